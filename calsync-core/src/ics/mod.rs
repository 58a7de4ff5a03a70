//! iCalendar splitting, inspection and reassembly.
//!
//! This is deliberately not a validating parser. Feeds and CalDAV servers in
//! the wild disagree on folding, line endings and optional properties, so
//! event bodies travel as verbatim byte blocks and only the handful of
//! properties the sync logic needs are ever interpreted.

mod generate;
mod parse;

pub use generate::{assemble_calendar, ICS_CONTENT_TYPE};
pub use parse::{canonicalize, parse_events, split_document, IcsDocument, ParsedCalendar};
