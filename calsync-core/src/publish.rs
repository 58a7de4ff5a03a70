//! In-memory map of published ICS feeds.
//!
//! The HTTP layer reads from this map; the sync engine swaps entries in
//! after each successful source cycle. Entries survive failed cycles, so a
//! broken upstream serves stale data instead of nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::SyncResult;
use crate::store::Store;

/// One published feed: the exact bytes of the last successful sync.
#[derive(Debug, Clone)]
pub struct PublishedCalendar {
    pub body: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// Shared `ics_path → PublishedCalendar` map.
#[derive(Clone, Default)]
pub struct Publisher {
    inner: Arc<RwLock<HashMap<String, PublishedCalendar>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every cached feed from the store. Called once at boot so feeds
    /// are served immediately after a restart.
    pub async fn preload(&self, store: &Store) -> SyncResult<usize> {
        let feeds = store.stored_feeds()?;
        let mut map = self.inner.write().await;
        map.clear();
        for feed in feeds {
            map.insert(
                feed.ics_path,
                PublishedCalendar {
                    body: feed.body,
                    content_type: feed.content_type,
                    last_modified: feed.last_synced.unwrap_or_else(Utc::now),
                },
            );
        }
        Ok(map.len())
    }

    /// Swap in the feed for a path. The whole entry replaces atomically.
    pub async fn publish(&self, ics_path: &str, calendar: PublishedCalendar) {
        self.inner
            .write()
            .await
            .insert(ics_path.to_string(), calendar);
    }

    /// Drop a path, e.g. when its source is deleted or renamed.
    pub async fn remove(&self, ics_path: &str) {
        self.inner.write().await.remove(ics_path);
    }

    /// Case-sensitive lookup.
    pub async fn get(&self, ics_path: &str) -> Option<PublishedCalendar> {
        self.inner.read().await.get(ics_path).cloned()
    }
}
