//! Destination endpoints: CRUD, manual trigger, status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use calsync_core::{
    Destination, DestinationPatch, NewDestination, SyncStatus, TriggerOutcome, UnitId,
};

use crate::routes::{ApiError, MessageResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/destinations", get(list_destinations).post(create_destination))
        .route(
            "/destinations/{id}",
            put(update_destination).delete(delete_destination),
        )
        .route("/destinations/{id}/sync", post(trigger_sync))
        .route("/destinations/{id}/status", get(sync_status))
}

/// Destination as returned by the API; no password field.
#[derive(Serialize)]
pub struct DestinationResponse {
    pub id: i64,
    pub name: String,
    pub ics_url: String,
    pub caldav_url: String,
    pub calendar_name: String,
    pub username: String,
    pub sync_interval_secs: i64,
    pub sync_all: bool,
    pub keep_local: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Destination> for DestinationResponse {
    fn from(d: Destination) -> Self {
        Self {
            id: d.id,
            name: d.name,
            ics_url: d.ics_url,
            caldav_url: d.caldav_url,
            calendar_name: d.calendar_name,
            username: d.username,
            sync_interval_secs: d.sync_interval_secs,
            sync_all: d.sync_all,
            keep_local: d.keep_local,
            last_synced: d.last_synced,
            last_sync_status: d.last_sync_status,
            last_sync_error: d.last_sync_error,
            created_at: d.created_at,
        }
    }
}

#[derive(Serialize)]
struct DestinationListResponse {
    destinations: Vec<DestinationResponse>,
}

#[derive(Serialize)]
struct SyncStatusResponse {
    last_synced: Option<DateTime<Utc>>,
    last_sync_status: SyncStatus,
    last_sync_error: Option<String>,
}

#[derive(Deserialize)]
struct CreateDestinationRequest {
    name: String,
    ics_url: String,
    caldav_url: String,
    calendar_name: String,
    username: String,
    password: String,
    sync_interval_secs: i64,
    #[serde(default)]
    sync_all: bool,
    #[serde(default)]
    keep_local: bool,
}

#[derive(Deserialize)]
struct UpdateDestinationRequest {
    name: Option<String>,
    ics_url: Option<String>,
    caldav_url: Option<String>,
    calendar_name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    sync_interval_secs: Option<i64>,
    sync_all: Option<bool>,
    keep_local: Option<bool>,
}

async fn list_destinations(
    State(state): State<AppState>,
) -> Result<Json<DestinationListResponse>, ApiError> {
    let destinations = state
        .store
        .list_destinations()?
        .into_iter()
        .map(DestinationResponse::from)
        .collect();
    Ok(Json(DestinationListResponse { destinations }))
}

async fn create_destination(
    State(state): State<AppState>,
    Json(req): Json<CreateDestinationRequest>,
) -> Result<(StatusCode, Json<DestinationResponse>), ApiError> {
    if req.sync_interval_secs < 1 {
        return Err(ApiError::BadRequest(
            "sync_interval_secs must be >= 1".to_string(),
        ));
    }
    if req.ics_url.is_empty() || req.caldav_url.is_empty() {
        return Err(ApiError::BadRequest(
            "ics_url and caldav_url must not be empty".to_string(),
        ));
    }
    if req.calendar_name.is_empty() {
        return Err(ApiError::BadRequest(
            "calendar_name must not be empty".to_string(),
        ));
    }

    let created = state.store.create_destination(&NewDestination {
        name: req.name,
        ics_url: req.ics_url,
        caldav_url: req.caldav_url,
        calendar_name: req.calendar_name,
        username: req.username,
        password: req.password,
        sync_interval_secs: req.sync_interval_secs,
        sync_all: req.sync_all,
        keep_local: req.keep_local,
    })?;

    state.engine.register(UnitId::Destination(created.id));

    Ok((StatusCode::CREATED, Json(DestinationResponse::from(created))))
}

async fn update_destination(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDestinationRequest>,
) -> Result<Json<DestinationResponse>, ApiError> {
    if matches!(req.sync_interval_secs, Some(secs) if secs < 1) {
        return Err(ApiError::BadRequest(
            "sync_interval_secs must be >= 1".to_string(),
        ));
    }

    let patch = DestinationPatch {
        name: req.name,
        ics_url: req.ics_url,
        caldav_url: req.caldav_url,
        calendar_name: req.calendar_name,
        username: req.username,
        password: req.password,
        sync_interval_secs: req.sync_interval_secs,
        sync_all: req.sync_all,
        keep_local: req.keep_local,
    };
    let Some(updated) = state.store.update_destination(id, &patch)? else {
        return Err(ApiError::NotFound(format!("destination {} not found", id)));
    };

    state.engine.reload(UnitId::Destination(id)).await;

    Ok(Json(DestinationResponse::from(updated)))
}

async fn delete_destination(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    if state.store.get_destination(id)?.is_none() {
        return Err(ApiError::NotFound(format!("destination {} not found", id)));
    }

    state.engine.remove(UnitId::Destination(id)).await;
    state.store.delete_destination(id)?;

    Ok(Json(MessageResponse::new("destination deleted")))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    match state.engine.try_trigger(UnitId::Destination(id)) {
        TriggerOutcome::Started => Ok((
            StatusCode::ACCEPTED,
            Json(MessageResponse::new("sync started")),
        )),
        TriggerOutcome::AlreadyRunning => Ok((
            StatusCode::CONFLICT,
            Json(MessageResponse::new("sync already in progress")),
        )),
        TriggerOutcome::Unknown => {
            Err(ApiError::NotFound(format!("destination {} not found", id)))
        }
    }
}

async fn sync_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let Some(dest) = state.store.get_destination(id)? else {
        return Err(ApiError::NotFound(format!("destination {} not found", id)));
    };
    Ok(Json(SyncStatusResponse {
        last_synced: dest.last_synced,
        last_sync_status: dest.last_sync_status,
        last_sync_error: dest.last_sync_error,
    }))
}
