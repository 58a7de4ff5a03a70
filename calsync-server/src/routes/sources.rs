//! Source endpoints: CRUD, manual trigger, status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use calsync_core::store::records::is_valid_ics_path;
use calsync_core::{NewSource, Source, SourcePatch, SyncStatus, TriggerOutcome, UnitId};

use crate::routes::{ApiError, MessageResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sources", get(list_sources).post(create_source))
        .route("/sources/{id}", put(update_source).delete(delete_source))
        .route("/sources/{id}/sync", post(trigger_sync))
        .route("/sources/{id}/status", get(sync_status))
}

/// Source as returned by the API. The password is write-only and has no
/// field here at all.
#[derive(Serialize)]
pub struct SourceResponse {
    pub id: i64,
    pub name: String,
    pub ics_path: String,
    pub caldav_url: String,
    pub calendar_name: Option<String>,
    pub username: String,
    pub sync_interval_secs: i64,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Source> for SourceResponse {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            name: s.name,
            ics_path: s.ics_path,
            caldav_url: s.caldav_url,
            calendar_name: s.calendar_name,
            username: s.username,
            sync_interval_secs: s.sync_interval_secs,
            last_synced: s.last_synced,
            last_sync_status: s.last_sync_status,
            last_sync_error: s.last_sync_error,
            created_at: s.created_at,
        }
    }
}

#[derive(Serialize)]
struct SourceListResponse {
    sources: Vec<SourceResponse>,
}

#[derive(Serialize)]
struct SyncStatusResponse {
    last_synced: Option<DateTime<Utc>>,
    last_sync_status: SyncStatus,
    last_sync_error: Option<String>,
}

#[derive(Deserialize)]
struct CreateSourceRequest {
    name: String,
    ics_path: String,
    caldav_url: String,
    #[serde(default)]
    calendar_name: Option<String>,
    username: String,
    password: String,
    #[serde(default)]
    sync_interval_secs: i64,
}

/// Partial update; absent fields keep their value. `calendar_name` can be
/// cleared with an explicit null. An empty password keeps the stored one.
#[derive(Deserialize)]
struct UpdateSourceRequest {
    name: Option<String>,
    ics_path: Option<String>,
    caldav_url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    calendar_name: Option<Option<String>>,
    username: Option<String>,
    password: Option<String>,
    sync_interval_secs: Option<i64>,
}

/// Distinguishes an absent field (outer `None`) from an explicit null
/// (`Some(None)`), which serde's stock `Option` impl collapses.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

async fn list_sources(
    State(state): State<AppState>,
) -> Result<Json<SourceListResponse>, ApiError> {
    let sources = state
        .store
        .list_sources()?
        .into_iter()
        .map(SourceResponse::from)
        .collect();
    Ok(Json(SourceListResponse { sources }))
}

async fn create_source(
    State(state): State<AppState>,
    Json(req): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<SourceResponse>), ApiError> {
    if !is_valid_ics_path(&req.ics_path) {
        return Err(ApiError::BadRequest(
            "ics_path must be non-empty and contain only letters, digits, '.', '_' or '-'"
                .to_string(),
        ));
    }
    if req.sync_interval_secs < 0 {
        return Err(ApiError::BadRequest(
            "sync_interval_secs must be >= 0".to_string(),
        ));
    }
    if req.caldav_url.is_empty() {
        return Err(ApiError::BadRequest("caldav_url must not be empty".to_string()));
    }

    let created = state.store.create_source(&NewSource {
        name: req.name,
        ics_path: req.ics_path,
        caldav_url: req.caldav_url,
        calendar_name: req.calendar_name,
        username: req.username,
        password: req.password,
        sync_interval_secs: req.sync_interval_secs,
    })?;

    state.engine.register(UnitId::Source(created.id));

    Ok((StatusCode::CREATED, Json(SourceResponse::from(created))))
}

async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSourceRequest>,
) -> Result<Json<SourceResponse>, ApiError> {
    if let Some(ref path) = req.ics_path {
        if !is_valid_ics_path(path) {
            return Err(ApiError::BadRequest(
                "ics_path must be non-empty and contain only letters, digits, '.', '_' or '-'"
                    .to_string(),
            ));
        }
    }
    if matches!(req.sync_interval_secs, Some(secs) if secs < 0) {
        return Err(ApiError::BadRequest(
            "sync_interval_secs must be >= 0".to_string(),
        ));
    }

    let Some(existing) = state.store.get_source(id)? else {
        return Err(ApiError::NotFound(format!("source {} not found", id)));
    };

    let patch = SourcePatch {
        name: req.name,
        ics_path: req.ics_path,
        caldav_url: req.caldav_url,
        calendar_name: req.calendar_name,
        username: req.username,
        password: req.password,
        sync_interval_secs: req.sync_interval_secs,
    };
    let Some(updated) = state.store.update_source(id, &patch)? else {
        return Err(ApiError::NotFound(format!("source {} not found", id)));
    };

    // A renamed feed moves its cached body to the new path immediately.
    if existing.ics_path != updated.ics_path {
        state.publisher.remove(&existing.ics_path).await;
        if let Some(feed) = state.store.stored_feed(id)? {
            state
                .publisher
                .publish(
                    &updated.ics_path,
                    calsync_core::PublishedCalendar {
                        body: feed.body,
                        content_type: feed.content_type,
                        last_modified: feed.last_synced.unwrap_or_else(Utc::now),
                    },
                )
                .await;
        }
    }

    state.engine.reload(UnitId::Source(id)).await;

    Ok(Json(SourceResponse::from(updated)))
}

async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(existing) = state.store.get_source(id)? else {
        return Err(ApiError::NotFound(format!("source {} not found", id)));
    };

    // Stop the scheduler task before the record disappears; a cycle caught
    // mid-flight finishes but its status update is discarded.
    state.engine.remove(UnitId::Source(id)).await;
    state.store.delete_source(id)?;
    state.publisher.remove(&existing.ics_path).await;

    Ok(Json(MessageResponse::new("source deleted")))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    match state.engine.try_trigger(UnitId::Source(id)) {
        TriggerOutcome::Started => Ok((
            StatusCode::ACCEPTED,
            Json(MessageResponse::new("sync started")),
        )),
        TriggerOutcome::AlreadyRunning => Ok((
            StatusCode::CONFLICT,
            Json(MessageResponse::new("sync already in progress")),
        )),
        TriggerOutcome::Unknown => {
            Err(ApiError::NotFound(format!("source {} not found", id)))
        }
    }
}

async fn sync_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let Some(source) = state.store.get_source(id)? else {
        return Err(ApiError::NotFound(format!("source {} not found", id)));
    };
    Ok(Json(SyncStatusResponse {
        last_synced: source.last_synced,
        last_sync_status: source.last_sync_status,
        last_sync_error: source.last_sync_error,
    }))
}
