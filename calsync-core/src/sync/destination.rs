//! Destination cycle: remote ICS feed → CalDAV collection.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use super::{truncate_error, TaskContext};
use crate::caldav::CalDavClient;
use crate::diff::{self, DiffKind, SyncPolicy};
use crate::error::{SyncError, SyncResult};
use crate::ics;
use crate::store::records::Destination;

pub(super) async fn run_cycle(ctx: &TaskContext, id: i64) {
    let dest = match ctx.store.get_destination(id) {
        Ok(Some(dest)) => dest,
        Ok(None) => {
            tracing::debug!(destination = id, "skipping cycle: destination deleted");
            return;
        }
        Err(e) => {
            tracing::error!(destination = id, error = %e, "failed to load destination config");
            return;
        }
    };

    let outcome = mirror(&dest, ctx.http_timeout).await;
    if ctx.discard.load(Ordering::SeqCst) {
        return;
    }

    match outcome {
        Ok(report) if report.errors.is_empty() => {
            let _ = ctx.store.mark_destination_ok(id, Utc::now());
            tracing::info!(
                destination = id,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                "destination sync ok"
            );
        }
        Ok(report) => {
            let joined = report.errors.join("; ");
            tracing::warn!(
                destination = id,
                failures = report.errors.len(),
                "destination sync finished with errors"
            );
            let _ = ctx
                .store
                .mark_destination_error(id, &truncate_error(&joined));
        }
        Err(e) => {
            tracing::warn!(destination = id, error = %e, "destination sync failed");
            let _ = ctx
                .store
                .mark_destination_error(id, &truncate_error(&e.to_string()));
        }
    }
}

#[derive(Debug, Default)]
struct CycleReport {
    created: usize,
    updated: usize,
    deleted: usize,
    /// Per-event failures and parse warnings. Non-empty ⇒ cycle status error.
    errors: Vec<String>,
}

/// One full mirror pass. Terminal failures (feed unreachable, discovery or
/// listing failed) abort via `Err`; per-event failures accumulate in the
/// report and leave the remaining operations running.
async fn mirror(dest: &Destination, timeout: Duration) -> SyncResult<CycleReport> {
    let feed = download_feed(&dest.ics_url, timeout).await?;
    let parsed = ics::parse_events(&feed)?;

    let mut report = CycleReport {
        errors: parsed.warnings,
        ..Default::default()
    };

    let client = CalDavClient::new(&dest.caldav_url, &dest.username, &dest.password, timeout)?;
    let calendar_url = match client
        .discover_calendar_url(Some(&dest.calendar_name))
        .await
    {
        Ok(url) => url,
        // The named collection may simply not exist yet; create it once and
        // rediscover.
        Err(SyncError::NotFound(_)) => {
            let url = client.child_collection_url(&dest.calendar_name)?;
            client.mkcalendar(&url, &dest.calendar_name).await?;
            client
                .discover_calendar_url(Some(&dest.calendar_name))
                .await?
        }
        Err(e) => return Err(e),
    };

    let listed = client.list_events(&calendar_url).await?;
    let mut local = Vec::new();
    for (href, data) in listed {
        match ics::parse_events(&data) {
            Ok(p) => {
                report.errors.extend(p.warnings);
                for event in p.events {
                    local.push((href.clone(), event));
                }
            }
            Err(e) => report
                .errors
                .push(format!("unreadable event at {}: {}", href, e)),
        }
    }

    let policy = SyncPolicy {
        sync_all: dest.sync_all,
        keep_local: dest.keep_local,
    };
    let plan = diff::plan(&parsed.events, &local, Utc::now(), policy);
    report.errors.extend(plan.warnings);

    for op in &plan.ops {
        let result = match op.kind {
            DiffKind::Create => client
                .put_event(
                    &calendar_url,
                    &op.uid,
                    op.body.as_deref().unwrap_or_default(),
                    true,
                )
                .await
                .map(|_| ()),
            DiffKind::Update => client
                .put_event(
                    &calendar_url,
                    &op.uid,
                    op.body.as_deref().unwrap_or_default(),
                    false,
                )
                .await
                .map(|_| ()),
            DiffKind::Delete => match op.href.as_deref() {
                Some(href) => client.delete_event(href).await,
                None => Ok(()),
            },
        };

        match result {
            Ok(()) => match op.kind {
                DiffKind::Create => report.created += 1,
                DiffKind::Update => report.updated += 1,
                DiffKind::Delete => report.deleted += 1,
            },
            Err(e) => report.errors.push(format!("{} failed: {}", op, e)),
        }
    }

    Ok(report)
}

/// Download the remote feed. Unauthenticated by design; content type is not
/// enforced (feeds serve `text/calendar`, `text/plain` and worse).
async fn download_feed(ics_url: &str, timeout: Duration) -> SyncResult<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Network(e.to_string()))?;

    let resp = client.get(ics_url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SyncError::Upstream {
            status: status.as_u16(),
            body: format!("fetching feed {}", ics_url),
        });
    }
    Ok(resp.text().await?)
}
