//! Source cycle: CalDAV → published ICS feed.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use super::{truncate_error, TaskContext};
use crate::caldav::CalDavClient;
use crate::error::SyncResult;
use crate::ics;
use crate::publish::PublishedCalendar;
use crate::store::records::Source;

pub(super) async fn run_cycle(ctx: &TaskContext, id: i64) {
    let source = match ctx.store.get_source(id) {
        Ok(Some(source)) => source,
        Ok(None) => {
            tracing::debug!(source = id, "skipping cycle: source deleted");
            return;
        }
        Err(e) => {
            tracing::error!(source = id, error = %e, "failed to load source config");
            return;
        }
    };

    match pull(&source, ctx.http_timeout).await {
        Ok((body, event_count)) => {
            if ctx.discard.load(Ordering::SeqCst) {
                return;
            }
            let now = Utc::now();
            if let Err(e) =
                ctx.store
                    .save_source_calendar(id, &body, ics::ICS_CONTENT_TYPE, now)
            {
                tracing::error!(source = id, error = %e, "failed to persist feed");
                let _ = ctx.store.mark_source_error(id, &truncate_error(&e.to_string()));
                return;
            }
            ctx.publisher
                .publish(
                    &source.ics_path,
                    PublishedCalendar {
                        body,
                        content_type: ics::ICS_CONTENT_TYPE.to_string(),
                        last_modified: now,
                    },
                )
                .await;
            tracing::info!(source = id, events = event_count, "source sync ok");
        }
        Err(e) => {
            if ctx.discard.load(Ordering::SeqCst) {
                return;
            }
            // The previously published body stays; stale beats absent.
            tracing::warn!(source = id, error = %e, "source sync failed");
            let _ = ctx.store.mark_source_error(id, &truncate_error(&e.to_string()));
        }
    }
}

/// Fetch every event of the source's calendar and assemble the feed body.
async fn pull(source: &Source, timeout: Duration) -> SyncResult<(String, usize)> {
    let client = CalDavClient::new(
        &source.caldav_url,
        &source.username,
        &source.password,
        timeout,
    )?;

    let calendar_url = client
        .discover_calendar_url(source.calendar_name.as_deref())
        .await?;
    let listed = client.list_events(&calendar_url).await?;

    // REPORT already returned the bodies; split out the VEVENT blocks and
    // keep their bytes untouched.
    let mut blocks = Vec::new();
    for (_href, data) in &listed {
        blocks.extend(ics::split_document(data).events);
    }

    let count = blocks.len();
    let body = ics::assemble_calendar(blocks.iter().map(String::as_str));
    Ok((body, count))
}
