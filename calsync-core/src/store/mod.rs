//! Persisted configuration store backed by SQLite.
//!
//! One connection behind a mutex; every public call locks, runs a short
//! synchronous statement and unlocks. The lock is never held across network
//! I/O. Status columns are written only by the sync engine, the rest only by
//! the configuration API.

pub mod records;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::{SyncError, SyncResult};
use self::records::{
    Destination, DestinationPatch, NewDestination, NewSource, Source, SourcePatch, SyncStatus,
};

/// Cached publish state of a source, as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredFeed {
    pub ics_path: String,
    pub body: String,
    pub content_type: String,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SyncResult<T>) -> SyncResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Internal("store lock poisoned".to_string()))?;
        f(&conn)
    }

    /// Cheap liveness probe for the health endpoint.
    pub fn ping(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .is_ok()
    }

    pub fn counts(&self) -> SyncResult<(i64, i64)> {
        self.with_conn(|conn| {
            let sources = conn.query_row("SELECT COUNT(*) FROM sources", [], |r| r.get(0))?;
            let destinations =
                conn.query_row("SELECT COUNT(*) FROM destinations", [], |r| r.get(0))?;
            Ok((sources, destinations))
        })
    }

    // --- sources ---

    pub fn create_source(&self, new: &NewSource) -> SyncResult<Source> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sources
                   (name, ics_path, caldav_url, calendar_name, username, password,
                    sync_interval_secs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.name,
                    new.ics_path,
                    new.caldav_url,
                    new.calendar_name,
                    new.username,
                    new.password,
                    new.sync_interval_secs,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| map_constraint(e, "ics_path is already in use"))?;
            let id = conn.last_insert_rowid();
            get_source_inner(conn, id)?
                .ok_or_else(|| SyncError::Internal("source vanished after insert".to_string()))
        })
    }

    pub fn get_source(&self, id: i64) -> SyncResult<Option<Source>> {
        self.with_conn(|conn| get_source_inner(conn, id))
    }

    pub fn list_sources(&self) -> SyncResult<Vec<Source>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY id", SELECT_SOURCE))?;
            let rows = stmt.query_map([], source_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Apply a partial update. Returns the updated record, or `None` when the
    /// id does not exist. An absent or empty password keeps the stored one.
    pub fn update_source(&self, id: i64, patch: &SourcePatch) -> SyncResult<Option<Source>> {
        self.with_conn(|conn| {
            let Some(mut source) = get_source_inner(conn, id)? else {
                return Ok(None);
            };

            if let Some(ref v) = patch.name {
                source.name = v.clone();
            }
            if let Some(ref v) = patch.ics_path {
                source.ics_path = v.clone();
            }
            if let Some(ref v) = patch.caldav_url {
                source.caldav_url = v.clone();
            }
            if let Some(ref v) = patch.calendar_name {
                source.calendar_name = v.clone();
            }
            if let Some(ref v) = patch.username {
                source.username = v.clone();
            }
            if let Some(ref v) = patch.password {
                if !v.is_empty() {
                    source.password = v.clone();
                }
            }
            if let Some(v) = patch.sync_interval_secs {
                source.sync_interval_secs = v;
            }

            conn.execute(
                "UPDATE sources SET name=?1, ics_path=?2, caldav_url=?3, calendar_name=?4,
                   username=?5, password=?6, sync_interval_secs=?7 WHERE id=?8",
                params![
                    source.name,
                    source.ics_path,
                    source.caldav_url,
                    source.calendar_name,
                    source.username,
                    source.password,
                    source.sync_interval_secs,
                    id,
                ],
            )
            .map_err(|e| map_constraint(e, "ics_path is already in use"))?;

            get_source_inner(conn, id)
        })
    }

    pub fn delete_source(&self, id: i64) -> SyncResult<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sources WHERE id=?1", params![id])?;
            Ok(n > 0)
        })
    }

    /// Record a failed source cycle. The cached body is left untouched so the
    /// feed keeps serving the last good state.
    pub fn mark_source_error(&self, id: i64, message: &str) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sources SET last_sync_status='error', last_sync_error=?1 WHERE id=?2",
                params![message, id],
            )?;
            Ok(())
        })
    }

    /// Record a successful source cycle: cached body, `last_synced` and
    /// status move together in one statement, so readers never observe a
    /// half-updated source.
    pub fn save_source_calendar(
        &self,
        id: i64,
        body: &str,
        content_type: &str,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sources SET ics_data=?1, ics_content_type=?2, last_synced=?3,
                   last_sync_status='ok', last_sync_error=NULL WHERE id=?4",
                params![body, content_type, synced_at.to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    /// Cached feed for one source, if a sync has succeeded before.
    pub fn stored_feed(&self, id: i64) -> SyncResult<Option<StoredFeed>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ics_path, ics_data, ics_content_type, last_synced
                   FROM sources WHERE id=?1 AND ics_data IS NOT NULL",
            )?;
            let mut rows = stmt.query_map(params![id], feed_from_row)?;
            rows.next().transpose().map_err(SyncError::from)
        })
    }

    /// All cached feeds, for preloading the publisher at boot.
    pub fn stored_feeds(&self) -> SyncResult<Vec<StoredFeed>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ics_path, ics_data, ics_content_type, last_synced
                   FROM sources WHERE ics_data IS NOT NULL",
            )?;
            let rows = stmt.query_map([], feed_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    // --- destinations ---

    pub fn create_destination(&self, new: &NewDestination) -> SyncResult<Destination> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO destinations
                   (name, ics_url, caldav_url, calendar_name, username, password,
                    sync_interval_secs, sync_all, keep_local, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new.name,
                    new.ics_url,
                    new.caldav_url,
                    new.calendar_name,
                    new.username,
                    new.password,
                    new.sync_interval_secs,
                    new.sync_all,
                    new.keep_local,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            get_destination_inner(conn, id)?
                .ok_or_else(|| SyncError::Internal("destination vanished after insert".to_string()))
        })
    }

    pub fn get_destination(&self, id: i64) -> SyncResult<Option<Destination>> {
        self.with_conn(|conn| get_destination_inner(conn, id))
    }

    pub fn list_destinations(&self) -> SyncResult<Vec<Destination>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY id", SELECT_DESTINATION))?;
            let rows = stmt.query_map([], destination_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn update_destination(
        &self,
        id: i64,
        patch: &DestinationPatch,
    ) -> SyncResult<Option<Destination>> {
        self.with_conn(|conn| {
            let Some(mut dest) = get_destination_inner(conn, id)? else {
                return Ok(None);
            };

            if let Some(ref v) = patch.name {
                dest.name = v.clone();
            }
            if let Some(ref v) = patch.ics_url {
                dest.ics_url = v.clone();
            }
            if let Some(ref v) = patch.caldav_url {
                dest.caldav_url = v.clone();
            }
            if let Some(ref v) = patch.calendar_name {
                dest.calendar_name = v.clone();
            }
            if let Some(ref v) = patch.username {
                dest.username = v.clone();
            }
            if let Some(ref v) = patch.password {
                if !v.is_empty() {
                    dest.password = v.clone();
                }
            }
            if let Some(v) = patch.sync_interval_secs {
                dest.sync_interval_secs = v;
            }
            if let Some(v) = patch.sync_all {
                dest.sync_all = v;
            }
            if let Some(v) = patch.keep_local {
                dest.keep_local = v;
            }

            conn.execute(
                "UPDATE destinations SET name=?1, ics_url=?2, caldav_url=?3, calendar_name=?4,
                   username=?5, password=?6, sync_interval_secs=?7, sync_all=?8, keep_local=?9
                 WHERE id=?10",
                params![
                    dest.name,
                    dest.ics_url,
                    dest.caldav_url,
                    dest.calendar_name,
                    dest.username,
                    dest.password,
                    dest.sync_interval_secs,
                    dest.sync_all,
                    dest.keep_local,
                    id,
                ],
            )?;

            get_destination_inner(conn, id)
        })
    }

    pub fn delete_destination(&self, id: i64) -> SyncResult<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM destinations WHERE id=?1", params![id])?;
            Ok(n > 0)
        })
    }

    pub fn mark_destination_error(&self, id: i64, message: &str) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE destinations SET last_sync_status='error', last_sync_error=?1 WHERE id=?2",
                params![message, id],
            )?;
            Ok(())
        })
    }

    pub fn mark_destination_ok(&self, id: i64, synced_at: DateTime<Utc>) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE destinations SET last_synced=?1, last_sync_status='ok',
                   last_sync_error=NULL WHERE id=?2",
                params![synced_at.to_rfc3339(), id],
            )?;
            Ok(())
        })
    }
}

const SELECT_SOURCE: &str = "SELECT id, name, ics_path, caldav_url, calendar_name, username,
    password, sync_interval_secs, last_synced, last_sync_status, last_sync_error, created_at
    FROM sources";

const SELECT_DESTINATION: &str = "SELECT id, name, ics_url, caldav_url, calendar_name, username,
    password, sync_interval_secs, sync_all, keep_local, last_synced, last_sync_status,
    last_sync_error, created_at FROM destinations";

fn get_source_inner(conn: &Connection, id: i64) -> SyncResult<Option<Source>> {
    let mut stmt = conn.prepare(&format!("{} WHERE id=?1", SELECT_SOURCE))?;
    let mut rows = stmt.query_map(params![id], source_from_row)?;
    rows.next().transpose().map_err(SyncError::from)
}

fn get_destination_inner(conn: &Connection, id: i64) -> SyncResult<Option<Destination>> {
    let mut stmt = conn.prepare(&format!("{} WHERE id=?1", SELECT_DESTINATION))?;
    let mut rows = stmt.query_map(params![id], destination_from_row)?;
    rows.next().transpose().map_err(SyncError::from)
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        ics_path: row.get(2)?,
        caldav_url: row.get(3)?,
        calendar_name: row.get(4)?,
        username: row.get(5)?,
        password: row.get(6)?,
        sync_interval_secs: row.get(7)?,
        last_synced: parse_optional_ts(row.get(8)?)?,
        last_sync_status: SyncStatus::from_str(&row.get::<_, String>(9)?),
        last_sync_error: row.get(10)?,
        created_at: parse_ts(row.get(11)?)?,
    })
}

fn destination_from_row(row: &Row<'_>) -> rusqlite::Result<Destination> {
    Ok(Destination {
        id: row.get(0)?,
        name: row.get(1)?,
        ics_url: row.get(2)?,
        caldav_url: row.get(3)?,
        calendar_name: row.get(4)?,
        username: row.get(5)?,
        password: row.get(6)?,
        sync_interval_secs: row.get(7)?,
        sync_all: row.get(8)?,
        keep_local: row.get(9)?,
        last_synced: parse_optional_ts(row.get(10)?)?,
        last_sync_status: SyncStatus::from_str(&row.get::<_, String>(11)?),
        last_sync_error: row.get(12)?,
        created_at: parse_ts(row.get(13)?)?,
    })
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<StoredFeed> {
    Ok(StoredFeed {
        ics_path: row.get(0)?,
        body: row.get(1)?,
        content_type: row.get(2)?,
        last_synced: parse_optional_ts(row.get(3)?)?,
    })
}

fn parse_ts(value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

fn parse_optional_ts(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(parse_ts).transpose()
}

fn map_constraint(e: rusqlite::Error, message: &str) -> SyncError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SyncError::Conflict(message.to_string())
        }
        _ => SyncError::Database(e),
    }
}

/// Stepped schema migrations keyed on `PRAGMA user_version`.
fn migrate(conn: &Connection) -> SyncResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                ics_path TEXT NOT NULL UNIQUE,
                caldav_url TEXT NOT NULL,
                calendar_name TEXT,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                sync_interval_secs INTEGER NOT NULL DEFAULT 0,
                last_synced TEXT,
                last_sync_status TEXT NOT NULL DEFAULT 'unset',
                last_sync_error TEXT,
                ics_data TEXT,
                ics_content_type TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS destinations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                ics_url TEXT NOT NULL,
                caldav_url TEXT NOT NULL,
                calendar_name TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                sync_interval_secs INTEGER NOT NULL DEFAULT 3600,
                sync_all INTEGER NOT NULL DEFAULT 0,
                keep_local INTEGER NOT NULL DEFAULT 0,
                last_synced TEXT,
                last_sync_status TEXT NOT NULL DEFAULT 'unset',
                last_sync_error TEXT,
                created_at TEXT NOT NULL
            );
            PRAGMA user_version = 1;",
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_source(path: &str) -> NewSource {
        NewSource {
            name: "Work".to_string(),
            ics_path: path.to_string(),
            caldav_url: "https://cal.example/dav/".to_string(),
            calendar_name: None,
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            sync_interval_secs: 300,
        }
    }

    fn new_destination() -> NewDestination {
        NewDestination {
            name: "Mirror".to_string(),
            ics_url: "https://feed.example/cal.ics".to_string(),
            caldav_url: "https://cal.example/dav/".to_string(),
            calendar_name: "mirror".to_string(),
            username: "bob".to_string(),
            password: "secret".to_string(),
            sync_interval_secs: 900,
            sync_all: false,
            keep_local: true,
        }
    }

    #[test]
    fn source_crud_round_trip() {
        let store = Store::in_memory().unwrap();

        let created = store.create_source(&new_source("work")).unwrap();
        assert_eq!(created.ics_path, "work");
        assert_eq!(created.last_sync_status, SyncStatus::Unset);
        assert!(created.last_synced.is_none());

        let listed = store.list_sources().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        assert!(store.delete_source(created.id).unwrap());
        assert!(!store.delete_source(created.id).unwrap());
        assert!(store.get_source(created.id).unwrap().is_none());
    }

    #[test]
    fn duplicate_ics_path_is_a_conflict() {
        let store = Store::in_memory().unwrap();
        store.create_source(&new_source("work")).unwrap();
        let err = store.create_source(&new_source("work")).unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[test]
    fn empty_patch_password_preserves_existing() {
        let store = Store::in_memory().unwrap();
        let created = store.create_source(&new_source("work")).unwrap();

        let patch = SourcePatch {
            name: Some("Renamed".to_string()),
            password: Some(String::new()),
            ..Default::default()
        };
        let updated = store.update_source(created.id, &patch).unwrap().unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.password, "hunter2");

        let patch = SourcePatch {
            password: Some("new-pass".to_string()),
            ..Default::default()
        };
        let updated = store.update_source(created.id, &patch).unwrap().unwrap();
        assert_eq!(updated.password, "new-pass");
    }

    #[test]
    fn save_calendar_updates_body_and_status_together() {
        let store = Store::in_memory().unwrap();
        let created = store.create_source(&new_source("work")).unwrap();
        let synced_at = Utc::now();

        store
            .save_source_calendar(created.id, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n",
                "text/calendar; charset=utf-8", synced_at)
            .unwrap();

        let source = store.get_source(created.id).unwrap().unwrap();
        assert_eq!(source.last_sync_status, SyncStatus::Ok);
        assert!(source.last_synced.is_some());
        assert!(source.last_sync_error.is_none());

        let feed = store.stored_feed(created.id).unwrap().unwrap();
        assert_eq!(feed.ics_path, "work");
        assert!(feed.body.contains("BEGIN:VCALENDAR"));
    }

    #[test]
    fn error_status_keeps_cached_body() {
        let store = Store::in_memory().unwrap();
        let created = store.create_source(&new_source("work")).unwrap();
        store
            .save_source_calendar(created.id, "cached", "text/calendar; charset=utf-8", Utc::now())
            .unwrap();

        store
            .mark_source_error(created.id, "discovery failed")
            .unwrap();

        let source = store.get_source(created.id).unwrap().unwrap();
        assert_eq!(source.last_sync_status, SyncStatus::Error);
        assert_eq!(source.last_sync_error.as_deref(), Some("discovery failed"));

        let feed = store.stored_feed(created.id).unwrap().unwrap();
        assert_eq!(feed.body, "cached");
    }

    #[test]
    fn destination_crud_and_status() {
        let store = Store::in_memory().unwrap();
        let created = store.create_destination(&new_destination()).unwrap();
        assert!(created.keep_local);
        assert!(!created.sync_all);

        let patch = DestinationPatch {
            sync_all: Some(true),
            keep_local: Some(false),
            ..Default::default()
        };
        let updated = store
            .update_destination(created.id, &patch)
            .unwrap()
            .unwrap();
        assert!(updated.sync_all);
        assert!(!updated.keep_local);

        store.mark_destination_ok(created.id, Utc::now()).unwrap();
        let dest = store.get_destination(created.id).unwrap().unwrap();
        assert_eq!(dest.last_sync_status, SyncStatus::Ok);
        assert!(dest.last_synced.is_some());

        store
            .mark_destination_error(created.id, "put u4 failed")
            .unwrap();
        let dest = store.get_destination(created.id).unwrap().unwrap();
        assert_eq!(dest.last_sync_status, SyncStatus::Error);
        assert!(dest.last_sync_error.as_deref().unwrap().contains("u4"));
    }

    #[test]
    fn migrations_are_idempotent() {
        let store = Store::in_memory().unwrap();
        store.with_conn(|conn| {
            migrate(conn)?;
            migrate(conn)?;
            Ok(())
        })
        .unwrap();
        assert!(store.ping());
    }

    #[test]
    fn open_creates_file_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caldav-sync.db");
        {
            let store = Store::open(&path).unwrap();
            store.create_source(&new_source("persisted")).unwrap();
        }
        let store = Store::open(&path).unwrap();
        let sources = store.list_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].ics_path, "persisted");
    }

    #[test]
    fn counts_reflect_rows() {
        let store = Store::in_memory().unwrap();
        store.create_source(&new_source("a")).unwrap();
        store.create_source(&new_source("b")).unwrap();
        store.create_destination(&new_destination()).unwrap();
        assert_eq!(store.counts().unwrap(), (2, 1));
    }
}
