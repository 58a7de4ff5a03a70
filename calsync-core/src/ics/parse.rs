//! ICS document splitting and property extraction.

use icalendar::parser::unfold;

use crate::error::{SyncError, SyncResult};
use crate::event::{Event, EventEnd, EventTime};

/// An ICS document split into its envelope and raw event blocks.
#[derive(Debug, Clone)]
pub struct IcsDocument {
    /// Every line outside `BEGIN:VEVENT`..`END:VEVENT`, CRLF-joined.
    pub envelope: String,
    /// Each event block verbatim, CRLF-terminated.
    pub events: Vec<String>,
}

/// Events parsed out of a document, plus non-fatal warnings (e.g. blocks
/// skipped because they carry no UID).
#[derive(Debug)]
pub struct ParsedCalendar {
    pub events: Vec<Event>,
    pub warnings: Vec<String>,
}

/// Split a document into envelope lines and `VEVENT` blocks.
///
/// CRLF and LF input are both tolerated; output lines are CRLF-terminated.
/// No iCalendar validation is applied, a block is whatever sits between a
/// `BEGIN:VEVENT` line and the next `END:VEVENT` line, inclusive.
pub fn split_document(input: &str) -> IcsDocument {
    let mut envelope = String::new();
    let mut events = Vec::new();
    let mut current = String::new();
    let mut in_vevent = false;

    for line in input.lines() {
        if line.starts_with("BEGIN:VEVENT") {
            in_vevent = true;
            current.clear();
        }
        if in_vevent {
            current.push_str(line);
            current.push_str("\r\n");
        } else {
            envelope.push_str(line);
            envelope.push_str("\r\n");
        }
        if line.starts_with("END:VEVENT") {
            in_vevent = false;
            events.push(current.clone());
            current.clear();
        }
    }

    IcsDocument { envelope, events }
}

/// Parse a full ICS document into events.
///
/// Requires a `VCALENDAR` wrapper somewhere in the input (a feed URL serving
/// an HTML error page should fail loudly, not sync zero events). Individual
/// blocks are never rejected; a block without a UID is skipped with a
/// warning.
pub fn parse_events(input: &str) -> SyncResult<ParsedCalendar> {
    if !input.contains("BEGIN:VCALENDAR") {
        return Err(SyncError::MalformedIcs(
            "no BEGIN:VCALENDAR in document".to_string(),
        ));
    }

    let doc = split_document(input);
    let mut events = Vec::new();
    let mut warnings = Vec::new();

    for block in doc.events {
        match parse_event_block(&block) {
            Some(event) => events.push(event),
            None => warnings.push(format!(
                "skipped a VEVENT without UID ({})",
                block_hint(&block)
            )),
        }
    }

    Ok(ParsedCalendar { events, warnings })
}

/// Extract the properties the sync logic cares about from one event block.
///
/// Folded lines are unfolded before scanning, but `raw_body` keeps the
/// original folding.
fn parse_event_block(block: &str) -> Option<Event> {
    let unfolded = unfold(block);

    let mut uid = None;
    let mut start = None;
    let mut end = None;
    let mut last_modified = None;

    for line in unfolded.lines() {
        let Some((name, value)) = property(line) else {
            continue;
        };
        match name {
            _ if name.eq_ignore_ascii_case("UID") => {
                uid = Some(value.trim().to_string());
            }
            _ if name.eq_ignore_ascii_case("DTSTART") => {
                start = EventTime::parse(value);
            }
            _ if name.eq_ignore_ascii_case("DTEND") => {
                end = EventTime::parse(value).map(EventEnd::DtEnd);
            }
            _ if name.eq_ignore_ascii_case("DURATION") => {
                if end.is_none() {
                    end = Some(EventEnd::Duration(value.trim().to_string()));
                }
            }
            _ if name.eq_ignore_ascii_case("LAST-MODIFIED") => {
                last_modified = EventTime::parse(value).and_then(|t| match t {
                    EventTime::DateTimeUtc(dt) => Some(dt),
                    _ => None,
                });
            }
            _ => {}
        }
    }

    let uid = uid.filter(|u| !u.is_empty())?;
    Some(Event {
        uid,
        start,
        end,
        last_modified,
        raw_body: block.to_string(),
    })
}

/// Split a content line into property name and value.
///
/// The name ends at the first `;` (parameters) or `:` (value); the value is
/// everything after the first `:`.
fn property(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name_end = match line.find(';') {
        Some(semi) if semi < colon => semi,
        _ => colon,
    };
    Some((&line[..name_end], &line[colon + 1..]))
}

/// Canonical form used for update detection: line endings normalized to LF,
/// trailing whitespace stripped per line, blank-line runs collapsed, trailing
/// blank lines dropped. Internal ordering is preserved.
pub fn canonicalize(body: &str) -> String {
    let mut out = String::new();
    let mut pending_blank = false;

    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = true;
            continue;
        }
        if pending_blank && !out.is_empty() {
            out.push('\n');
        }
        pending_blank = false;
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }

    out
}

/// Short identification of an anonymous block for warning messages.
fn block_hint(block: &str) -> String {
    unfold(block)
        .lines()
        .find_map(|l| property(l).filter(|(n, _)| n.eq_ignore_ascii_case("DTSTART")))
        .map(|(_, v)| format!("DTSTART {}", v.trim()))
        .unwrap_or_else(|| "no DTSTART".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const TWO_EVENTS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:u1\r\n\
DTSTART:20250101T100000Z\r\n\
DTEND:20250101T110000Z\r\n\
SUMMARY:First\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:u2\r\n\
DTSTART;VALUE=DATE:20250102\r\n\
DURATION:P1D\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn split_captures_envelope_and_blocks() {
        let doc = split_document(TWO_EVENTS);
        assert_eq!(doc.events.len(), 2);
        assert!(doc.events[0].starts_with("BEGIN:VEVENT"));
        assert!(doc.events[0].ends_with("END:VEVENT\r\n"));
        assert!(doc.envelope.contains("BEGIN:VCALENDAR"));
        assert!(doc.envelope.contains("END:VCALENDAR"));
        assert!(!doc.envelope.contains("SUMMARY"));
    }

    #[test]
    fn split_tolerates_lf_only_input() {
        let lf = TWO_EVENTS.replace("\r\n", "\n");
        let doc = split_document(&lf);
        assert_eq!(doc.events.len(), 2);
        assert!(doc.events[0].contains("UID:u1\r\n"));
    }

    #[test]
    fn parse_extracts_properties() {
        let parsed = parse_events(TWO_EVENTS).unwrap();
        assert_eq!(parsed.events.len(), 2);
        assert!(parsed.warnings.is_empty());

        let first = &parsed.events[0];
        assert_eq!(first.uid, "u1");
        assert_eq!(
            first.start.as_ref().unwrap().to_utc().unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
        );
        assert!(matches!(first.end, Some(EventEnd::DtEnd(_))));

        let second = &parsed.events[1];
        assert_eq!(second.uid, "u2");
        assert!(matches!(
            second.start,
            Some(EventTime::Date(_))
        ));
        assert_eq!(second.end, Some(EventEnd::Duration("P1D".to_string())));
    }

    #[test]
    fn parse_skips_event_without_uid() {
        let input = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20250101T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:kept\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let parsed = parse_events(input).unwrap();
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].uid, "kept");
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("without UID"));
    }

    #[test]
    fn parse_rejects_non_calendar_input() {
        let err = parse_events("<html>404</html>").unwrap_err();
        assert!(matches!(err, SyncError::MalformedIcs(_)));
    }

    #[test]
    fn parse_unfolds_before_scanning() {
        // UID folded across two physical lines
        let input = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:first-\r\n second-half\r\n\
DTSTART:20250101T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let parsed = parse_events(input).unwrap();
        assert_eq!(parsed.events[0].uid, "first-second-half");
        // raw body keeps the folded form
        assert!(parsed.events[0].raw_body.contains("UID:first-\r\n second-half"));
    }

    #[test]
    fn parse_ignores_tzid_parameter() {
        let input = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:z\r\n\
DTSTART;TZID=America/New_York:20250101T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let parsed = parse_events(input).unwrap();
        assert!(matches!(
            parsed.events[0].start,
            Some(EventTime::DateTimeFloating(_))
        ));
    }

    #[test]
    fn canonicalize_normalizes_line_endings() {
        let crlf = "BEGIN:VEVENT\r\nUID:x\r\nEND:VEVENT\r\n";
        let lf = "BEGIN:VEVENT\nUID:x\nEND:VEVENT\n";
        assert_eq!(canonicalize(crlf), canonicalize(lf));
    }

    #[test]
    fn canonicalize_collapses_blank_runs_and_trailing_newlines() {
        let messy = "A\r\n\r\n\r\nB\r\n\r\n";
        assert_eq!(canonicalize(messy), "A\n\nB");
    }
}
