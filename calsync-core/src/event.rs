//! In-flight event types extracted from iCalendar data.
//!
//! Events exist only for the duration of one sync cycle. The parsed fields
//! drive filtering and update detection; `raw_body` carries the original
//! bytes of the `BEGIN:VEVENT`..`END:VEVENT` block so servers receive what
//! the feed published, folding and unknown properties included.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// A single VEVENT as it travels through a sync cycle.
#[derive(Debug, Clone)]
pub struct Event {
    /// The `UID` property. Events without one never make it this far.
    pub uid: String,
    /// `DTSTART`, when present and in a recognized shape.
    pub start: Option<EventTime>,
    /// `DTEND` or `DURATION`, whichever the event carried.
    pub end: Option<EventEnd>,
    /// `LAST-MODIFIED`, when present as a UTC timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// Verbatim bytes of the event block, original line folding preserved.
    pub raw_body: String,
}

/// How an event bounds its end: an explicit timestamp or a duration value.
#[derive(Debug, Clone, PartialEq)]
pub enum EventEnd {
    DtEnd(EventTime),
    /// The raw `DURATION` value (e.g. `PT1H`). Not interpreted.
    Duration(String),
}

/// Event timestamp in one of the three recognized shapes.
///
/// `TZID=` parameters are preserved in the raw body but not interpreted;
/// their values parse as floating times.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTime {
    /// All-day date (`YYYYMMDD`)
    Date(NaiveDate),
    /// UTC datetime (`YYYYMMDDTHHMMSSZ`)
    DateTimeUtc(DateTime<Utc>),
    /// Floating datetime (`YYYYMMDDTHHMMSS`), local time without zone
    DateTimeFloating(NaiveDateTime),
}

impl EventTime {
    /// Parse an ICS timestamp value. Returns `None` for unrecognized shapes.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(stripped) = value.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
                .ok()
                .map(|dt| EventTime::DateTimeUtc(dt.and_utc()));
        }
        if value.len() == 8 {
            return NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()
                .map(EventTime::Date);
        }
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .ok()
            .map(EventTime::DateTimeFloating)
    }

    /// UTC instant for ordering and the past-event filter.
    ///
    /// Dates map to midnight; floating times are interpreted naively.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            EventTime::DateTimeUtc(dt) => Some(*dt),
            EventTime::DateTimeFloating(dt) => Some(dt.and_utc()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_utc_timestamp() {
        let t = EventTime::parse("20250601T120000Z").unwrap();
        assert_eq!(
            t,
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn parse_floating_timestamp() {
        let t = EventTime::parse("20250601T120000").unwrap();
        match t {
            EventTime::DateTimeFloating(dt) => {
                assert_eq!(dt.format("%Y%m%dT%H%M%S").to_string(), "20250601T120000");
            }
            other => panic!("expected floating, got {:?}", other),
        }
    }

    #[test]
    fn parse_all_day_date() {
        let t = EventTime::parse("20250601").unwrap();
        assert_eq!(t, EventTime::Date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        assert_eq!(
            t.to_utc().unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(EventTime::parse("tomorrow"), None);
        assert_eq!(EventTime::parse(""), None);
    }
}
