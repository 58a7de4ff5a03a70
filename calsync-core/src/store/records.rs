//! Persisted source/destination records and their mutation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a unit's most recent sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Unset,
    Ok,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unset => "unset",
            SyncStatus::Ok => "ok",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ok" => SyncStatus::Ok,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Unset,
        }
    }
}

/// A configured CalDAV → ICS pull.
///
/// Not serializable on purpose: the password must never travel through a
/// serializer. API layers build their own password-free views.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub name: String,
    /// URL-safe token the feed is published under (`/ics/{ics_path}`).
    pub ics_path: String,
    pub caldav_url: String,
    pub calendar_name: Option<String>,
    pub username: String,
    pub password: String,
    /// 0 disables the timer; the unit syncs only on manual trigger.
    pub sync_interval_secs: i64,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A configured ICS → CalDAV push.
#[derive(Debug, Clone)]
pub struct Destination {
    pub id: i64,
    pub name: String,
    pub ics_url: String,
    pub caldav_url: String,
    pub calendar_name: String,
    pub username: String,
    pub password: String,
    pub sync_interval_secs: i64,
    /// When false, events that already started are not mirrored.
    pub sync_all: bool,
    /// When true, events missing from the feed stay in the collection.
    pub keep_local: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub ics_path: String,
    pub caldav_url: String,
    pub calendar_name: Option<String>,
    pub username: String,
    pub password: String,
    pub sync_interval_secs: i64,
}

#[derive(Debug, Clone)]
pub struct NewDestination {
    pub name: String,
    pub ics_url: String,
    pub caldav_url: String,
    pub calendar_name: String,
    pub username: String,
    pub password: String,
    pub sync_interval_secs: i64,
    pub sync_all: bool,
    pub keep_local: bool,
}

/// Partial source update. `None` leaves a field untouched; an empty
/// `password` also preserves the stored one (passwords are write-only, so
/// clients cannot echo the current value back).
#[derive(Debug, Clone, Default)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub ics_path: Option<String>,
    pub caldav_url: Option<String>,
    pub calendar_name: Option<Option<String>>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sync_interval_secs: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DestinationPatch {
    pub name: Option<String>,
    pub ics_url: Option<String>,
    pub caldav_url: Option<String>,
    pub calendar_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sync_interval_secs: Option<i64>,
    pub sync_all: Option<bool>,
    pub keep_local: Option<bool>,
}

/// `ics_path` charset rule: letters, digits, dot, underscore, dash.
pub fn is_valid_ics_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
