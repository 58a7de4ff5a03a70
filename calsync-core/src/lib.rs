//! Core types and engines for calsync.
//!
//! This crate contains everything the server binary drives:
//! - `caldav` for talking to CalDAV servers over raw WebDAV verbs
//! - `ics` for splitting, inspecting and reassembling iCalendar documents
//! - `diff` for planning destination mirror operations
//! - `store` for the persisted source/destination configuration
//! - `publish` for the in-memory map of published ICS feeds
//! - `sync` for the per-unit background scheduler and sync cycles

pub mod caldav;
pub mod diff;
pub mod error;
pub mod event;
pub mod ics;
pub mod publish;
pub mod store;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use event::{Event, EventEnd, EventTime};
pub use publish::{PublishedCalendar, Publisher};
pub use store::records::{
    Destination, DestinationPatch, NewDestination, NewSource, Source, SourcePatch, SyncStatus,
};
pub use store::Store;
pub use sync::{Engine, TriggerOutcome, UnitId};
