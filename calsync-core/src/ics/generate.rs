//! ICS document assembly.

/// Content type for every published or uploaded calendar document.
pub const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Wrap event blocks in a minimal `VCALENDAR` envelope.
///
/// Bodies are emitted verbatim apart from line-ending normalization: RFC 5545
/// requires CRLF on the wire, while bodies may arrive with bare LF.
pub fn assemble_calendar<'a, I>(events: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    out.push_str("BEGIN:VCALENDAR\r\n");
    out.push_str("VERSION:2.0\r\n");
    out.push_str("PRODID:-//calsync//EN\r\n");
    out.push_str("CALSCALE:GREGORIAN\r\n");
    for body in events {
        for line in body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}
