//! Error types for calsync operations.

use thiserror::Error;

/// Errors that can occur while syncing, talking to servers or touching the store.
///
/// Every variant stringifies into a unit's `last_sync_error`; no structured
/// detail crosses the API boundary beyond the message text.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized: server rejected the configured credentials")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed multistatus response: {0}")]
    MalformedXml(String),

    #[error("malformed iCalendar data: {0}")]
    MalformedIcs(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for calsync operations.
pub type SyncResult<T> = Result<T, SyncError>;

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Network(e.to_string())
    }
}
