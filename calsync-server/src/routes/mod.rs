//! Route assembly and the shared API error type.

pub mod destinations;
pub mod health;
pub mod ics;
pub mod sources;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use calsync_core::SyncError;
use serde::Serialize;

use crate::state::AppState;

/// Standard API error body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Standard API message body.
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::NotFound(m) => ApiError::NotFound(m),
            SyncError::Conflict(m) => ApiError::Conflict(m),
            other => ApiError::Internal(other.into()),
        }
    }
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(sources::router())
        .merge(destinations::router())
        .merge(health::router());

    Router::new()
        .nest("/api", api)
        .merge(ics::router())
        .with_state(state)
}
