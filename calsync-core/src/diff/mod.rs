//! Destination diff computation.
//!
//! Decides which events to create, update, keep or delete when mirroring a
//! remote ICS feed into a CalDAV collection. Update detection is bytewise on
//! canonicalized event bodies; no field-level merging.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::event::Event;
use crate::ics::canonicalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Create => write!(f, "create"),
            DiffKind::Update => write!(f, "update"),
            DiffKind::Delete => write!(f, "delete"),
        }
    }
}

/// One planned operation against the CalDAV collection.
#[derive(Debug, Clone)]
pub struct EventDiff {
    pub kind: DiffKind,
    pub uid: String,
    /// New event body for create/update (verbatim remote bytes).
    pub body: Option<String>,
    /// Existing resource href for update/delete.
    pub href: Option<String>,
}

impl fmt::Display for EventDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.uid)
    }
}

/// User-visible destination policies.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    /// When false, remote events starting strictly before `now` are ignored.
    pub sync_all: bool,
    /// When true, events present only in the collection are left alone.
    pub keep_local: bool,
}

/// The ordered operation list for one destination cycle.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Creates and updates (uid ascending), then deletes (uid ascending), so
    /// subscribers never observe a transiently emptied collection.
    pub ops: Vec<EventDiff>,
    pub warnings: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Compute the plan for mirroring `remote_events` into a collection that
/// currently holds `local_events`.
///
/// Running the planner twice over unchanged inputs yields an empty second
/// plan: creates become skips once the event exists with the same canonical
/// body, and deletes remove their uid from the collection.
pub fn plan(
    remote_events: &[Event],
    local_events: &[(String, Event)],
    now: DateTime<Utc>,
    policy: SyncPolicy,
) -> SyncPlan {
    let mut warnings = Vec::new();

    // BTreeMaps give the uid-ascending order the apply step relies on.
    let mut remote_by_uid: BTreeMap<&str, &Event> = BTreeMap::new();
    for event in remote_events {
        if !policy.sync_all {
            // Events that cannot be proven past are kept.
            if let Some(start) = event.start.as_ref().and_then(|t| t.to_utc()) {
                if start < now {
                    continue;
                }
            }
        }
        if remote_by_uid.insert(&event.uid, event).is_some() {
            warnings.push(format!("duplicate UID '{}' in feed, last one wins", event.uid));
        }
    }

    let mut local_by_uid: BTreeMap<&str, (&str, &Event)> = BTreeMap::new();
    for (href, event) in local_events {
        local_by_uid.insert(&event.uid, (href, event));
    }

    let mut ops = Vec::new();

    for (uid, remote) in &remote_by_uid {
        match local_by_uid.get(uid) {
            None => ops.push(EventDiff {
                kind: DiffKind::Create,
                uid: (*uid).to_string(),
                body: Some(remote.raw_body.clone()),
                href: None,
            }),
            Some((href, local)) => {
                if canonicalize(&remote.raw_body) == canonicalize(&local.raw_body) {
                    continue;
                }
                ops.push(EventDiff {
                    kind: DiffKind::Update,
                    uid: (*uid).to_string(),
                    body: Some(remote.raw_body.clone()),
                    href: Some((*href).to_string()),
                });
            }
        }
    }

    if !policy.keep_local {
        for (uid, (href, _)) in &local_by_uid {
            if !remote_by_uid.contains_key(*uid) {
                ops.push(EventDiff {
                    kind: DiffKind::Delete,
                    uid: (*uid).to_string(),
                    body: None,
                    href: Some((*href).to_string()),
                });
            }
        }
    }

    SyncPlan { ops, warnings }
}
