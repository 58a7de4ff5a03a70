//! Lenient multistatus extraction.
//!
//! Walks the response tree matching element local names only; namespace
//! prefixes and declarations are ignored. `calendar-data` text comes through
//! unchanged apart from XML entity decoding, so downstream code sees the
//! server's original iCalendar bytes. A body that is not iCalendar at all is
//! not this module's problem.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{SyncError, SyncResult};

/// One `response` element of a multistatus document, reduced to the fields
/// the sync logic reads.
#[derive(Debug, Clone, Default)]
pub struct MultiStatusEntry {
    pub href: String,
    pub display_name: Option<String>,
    pub calendar_data: Option<String>,
    /// True when `resourcetype` contained a `calendar` element.
    pub is_calendar: bool,
}

/// Parse a multistatus document into its response entries.
pub fn parse_multistatus(input: &str) -> SyncResult<Vec<MultiStatusEntry>> {
    let mut reader = Reader::from_reader(input.as_bytes());

    let mut entries = Vec::new();
    let mut current: Option<MultiStatusEntry> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SyncError::MalformedXml(e.to_string()))?
        {
            Event::Eof => break,

            Event::Start(ref e) => match e.name().local_name().into_inner() {
                b"response" => {
                    current = Some(MultiStatusEntry::default());
                }
                b"href" => {
                    let text = read_text_content(&mut reader, b"href")?;
                    if let Some(ref mut entry) = current {
                        // Only the response-level href; hrefs nested in
                        // properties (e.g. calendar-home-set) are ignored.
                        if entry.href.is_empty() {
                            entry.href = text;
                        }
                    }
                }
                b"displayname" => {
                    let text = read_text_content(&mut reader, b"displayname")?;
                    if let Some(ref mut entry) = current {
                        if !text.is_empty() {
                            entry.display_name = Some(text);
                        }
                    }
                }
                b"calendar-data" => {
                    let text = read_text_content(&mut reader, b"calendar-data")?;
                    if let Some(ref mut entry) = current {
                        if !text.is_empty() {
                            entry.calendar_data = Some(text);
                        }
                    }
                }
                b"resourcetype" => {
                    let is_calendar = scan_resourcetype(&mut reader)?;
                    if let Some(ref mut entry) = current {
                        entry.is_calendar = entry.is_calendar || is_calendar;
                    }
                }
                _ => {}
            },

            Event::End(ref e) => {
                if e.name().local_name().into_inner() == b"response" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }

            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Collect the text inside an element up to its end tag, decoding entities
/// and CDATA but otherwise preserving the bytes.
fn read_text_content(reader: &mut Reader<&[u8]>, end: &[u8]) -> SyncResult<String> {
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SyncError::MalformedXml(e.to_string()))?
        {
            Event::Text(t) => {
                out.push_str(
                    &t.unescape()
                        .map_err(|e| SyncError::MalformedXml(e.to_string()))?,
                );
            }
            Event::CData(c) => {
                out.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(ref e) if e.name().local_name().into_inner() == end => break,
            Event::Eof => {
                return Err(SyncError::MalformedXml(format!(
                    "unexpected EOF inside <{}>",
                    String::from_utf8_lossy(end)
                )));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Scan a `resourcetype` element for a `calendar` child.
fn scan_resourcetype(reader: &mut Reader<&[u8]>) -> SyncResult<bool> {
    let mut is_calendar = false;
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SyncError::MalformedXml(e.to_string()))?
        {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if local_is(e, b"calendar") {
                    is_calendar = true;
                }
            }
            Event::End(ref e) if e.name().local_name().into_inner() == b"resourcetype" => break,
            Event::Eof => {
                return Err(SyncError::MalformedXml(
                    "unexpected EOF inside <resourcetype>".to_string(),
                ));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(is_calendar)
}

fn local_is(e: &BytesStart<'_>, name: &[u8]) -> bool {
    e.name().local_name().into_inner() == name
}
