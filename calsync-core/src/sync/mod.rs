//! Per-unit background scheduler and sync cycles.
//!
//! Each configured source and destination gets its own task. A task owns the
//! interval timer and a manual-trigger channel for its unit and runs cycles
//! strictly sequentially, which is what guarantees at-most-one sync in
//! flight per unit. Tasks close over only the unit id and the shared
//! store/publisher handles; configuration is fetched fresh at every cycle,
//! so edits take effect on the next tick without restarting the task.

mod destination;
mod source;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::SyncResult;
use crate::publish::Publisher;
use crate::store::Store;

/// Upper bound for `last_sync_error` text.
const MAX_ERROR_LEN: usize = 2048;

/// How long unit removal waits for an in-flight cycle before giving up.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Identifies one scheduled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    Source(i64),
    Destination(i64),
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Source(id) => write!(f, "source {}", id),
            UnitId::Destination(id) => write!(f, "destination {}", id),
        }
    }
}

/// Result of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    /// No scheduled task for that unit (unknown id, or the task died).
    Unknown,
}

/// Everything a unit task needs; deliberately free of the unit's own
/// configuration, which is re-read from the store each cycle.
struct TaskContext {
    unit: UnitId,
    store: Store,
    publisher: Publisher,
    http_timeout: Duration,
    running: Arc<AtomicBool>,
    /// Set when the unit is being removed: the in-flight cycle finishes its
    /// HTTP work but must not write status or publish.
    discard: Arc<AtomicBool>,
}

struct UnitHandle {
    running: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    trigger_tx: mpsc::Sender<()>,
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// The sync engine: owns one scheduler task per configured unit.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    publisher: Publisher,
    http_timeout: Duration,
    tasks: Arc<Mutex<HashMap<UnitId, UnitHandle>>>,
}

impl Engine {
    pub fn new(store: Store, publisher: Publisher, http_timeout: Duration) -> Self {
        Self {
            store,
            publisher,
            http_timeout,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a task for every unit currently in the store. Returns how
    /// many tasks were started.
    pub fn start(&self) -> SyncResult<usize> {
        let mut started = 0;
        for source in self.store.list_sources()? {
            self.register(UnitId::Source(source.id));
            started += 1;
        }
        for dest in self.store.list_destinations()? {
            self.register(UnitId::Destination(dest.id));
            started += 1;
        }
        Ok(started)
    }

    /// Spawn the scheduler task for a unit. The caller makes sure no task for
    /// this unit is still registered (see [`Engine::reload`]).
    pub fn register(&self, unit: UnitId) {
        let interval_secs = match self.interval_secs(unit) {
            Some(secs) => secs,
            None => {
                tracing::warn!(%unit, "not registering: unit not in store");
                return;
            }
        };

        let running = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(AtomicBool::new(false));
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ctx = TaskContext {
            unit,
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            http_timeout: self.http_timeout,
            running: running.clone(),
            discard: discard.clone(),
        };

        let join = tokio::spawn(run_unit_task(ctx, interval_secs, trigger_rx, cancel_rx));

        let handle = UnitHandle {
            running,
            discard,
            trigger_tx,
            cancel_tx,
            join,
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(unit, handle);
        }
        if interval_secs > 0 {
            tracing::info!(%unit, interval_secs, "scheduled");
        } else {
            tracing::info!(%unit, "scheduled (manual trigger only)");
        }
    }

    /// Re-register a unit after a configuration change so the timer picks up
    /// the new interval. An in-flight cycle finishes with the old settings
    /// and keeps its status update.
    pub async fn reload(&self, unit: UnitId) {
        self.stop_task(unit, false).await;
        self.register(unit);
    }

    /// Stop and forget a unit's task. The in-flight cycle (if any) runs to
    /// completion but its status update is discarded; after at most 5
    /// seconds the caller may delete the record regardless.
    pub async fn remove(&self, unit: UnitId) {
        self.stop_task(unit, true).await;
    }

    /// Request a manual sync.
    pub fn try_trigger(&self, unit: UnitId) -> TriggerOutcome {
        let tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return TriggerOutcome::Unknown,
        };
        let Some(handle) = tasks.get(&unit) else {
            return TriggerOutcome::Unknown;
        };
        if handle.running.load(Ordering::SeqCst) {
            return TriggerOutcome::AlreadyRunning;
        }
        match handle.trigger_tx.try_send(()) {
            Ok(()) => TriggerOutcome::Started,
            Err(mpsc::error::TrySendError::Full(())) => TriggerOutcome::AlreadyRunning,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerOutcome::Unknown,
        }
    }

    /// Whether a cycle for the unit is in flight right now.
    pub fn is_running(&self, unit: UnitId) -> bool {
        self.tasks
            .lock()
            .ok()
            .and_then(|tasks| tasks.get(&unit).map(|h| h.running.load(Ordering::SeqCst)))
            .unwrap_or(false)
    }

    /// Stop every task. Used on server shutdown.
    pub async fn shutdown(&self) {
        let units: Vec<UnitId> = match self.tasks.lock() {
            Ok(tasks) => tasks.keys().copied().collect(),
            Err(_) => return,
        };
        for unit in units {
            self.stop_task(unit, false).await;
        }
    }

    async fn stop_task(&self, unit: UnitId, discard_status: bool) {
        let handle = match self.tasks.lock() {
            Ok(mut tasks) => tasks.remove(&unit),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return;
        };

        if discard_status {
            handle.discard.store(true, Ordering::SeqCst);
        }
        let _ = handle.cancel_tx.send(true);
        drop(handle.trigger_tx);

        if time::timeout(STOP_GRACE, handle.join).await.is_err() {
            tracing::warn!(%unit, "sync task did not stop within {:?}; proceeding", STOP_GRACE);
        }
    }

    fn interval_secs(&self, unit: UnitId) -> Option<u64> {
        match unit {
            UnitId::Source(id) => self
                .store
                .get_source(id)
                .ok()
                .flatten()
                .map(|s| s.sync_interval_secs.max(0) as u64),
            UnitId::Destination(id) => self
                .store
                .get_destination(id)
                .ok()
                .flatten()
                .map(|d| d.sync_interval_secs.max(0) as u64),
        }
    }
}

async fn run_unit_task(
    ctx: TaskContext,
    interval_secs: u64,
    mut trigger_rx: mpsc::Receiver<()>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    // First fire lands one full period after registration; creating a unit
    // does not imply an immediate sync. Ticks that land while a cycle is in
    // flight are dropped, not queued.
    let mut ticker = if interval_secs > 0 {
        let period = Duration::from_secs(interval_secs);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(interval)
    } else {
        None
    };

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {}
            msg = trigger_rx.recv() => {
                if msg.is_none() {
                    break;
                }
            }
            _ = cancel_rx.changed() => break,
        }
        if *cancel_rx.borrow() {
            break;
        }

        ctx.running.store(true, Ordering::SeqCst);
        match ctx.unit {
            UnitId::Source(id) => source::run_cycle(&ctx, id).await,
            UnitId::Destination(id) => destination::run_cycle(&ctx, id).await,
        }
        ctx.running.store(false, Ordering::SeqCst);
    }

    tracing::debug!(unit = %ctx.unit, "scheduler task stopped");
}

async fn next_tick(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Clamp an error message to what fits in `last_sync_error`.
fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_respects_char_boundaries() {
        let short = "all fine";
        assert_eq!(truncate_error(short), short);

        let long = "ä".repeat(MAX_ERROR_LEN); // 2 bytes each
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LEN + '…'.len_utf8());
        assert!(truncated.ends_with('…'));
    }
}
