//! Health endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::routes::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn health_detailed(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let db_ok = state.store.ping();
    let (source_count, destination_count) = state.store.counts().unwrap_or((0, 0));

    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "source_count": source_count,
        "destination_count": destination_count,
        "db_ok": db_ok,
    })))
}
