//! High-level CalDAV operations used by the sync cycles.

use std::time::Duration;

use reqwest::Method;
use url::Url;

use crate::caldav::http::{DavHttpClient, DavRequest};
use crate::caldav::xml::parse_multistatus;
use crate::error::{SyncError, SyncResult};
use crate::ics;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

static PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:resourcetype />
    <d:displayname />
  </d:prop>
</d:propfind>"#;

static EVENTS_QUERY_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag />
    <c:calendar-data />
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT" />
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#;

/// Client bound to one CalDAV account (base URL + credentials).
#[derive(Debug, Clone)]
pub struct CalDavClient {
    http: DavHttpClient,
    base_url: Url,
}

impl CalDavClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Internal(format!("invalid CalDAV URL '{}': {}", base_url, e)))?;
        Ok(Self {
            http: DavHttpClient::new(username, password, timeout)?,
            base_url,
        })
    }

    /// Resolve the calendar collection URL for this account.
    ///
    /// If the base URL itself is a calendar collection it wins, regardless of
    /// its display name. Otherwise the children are listed with `Depth: 1`
    /// and the calendar whose `displayname` matches `calendar_name` is
    /// picked; without a name, the first child calendar.
    pub async fn discover_calendar_url(&self, calendar_name: Option<&str>) -> SyncResult<Url> {
        let resp = self
            .http
            .execute(
                DavRequest::new(propfind(), self.base_url.clone())
                    .depth("0")
                    .content_type(XML_CONTENT_TYPE)
                    .body(PROPFIND_BODY),
            )
            .await?;
        let answered_url = resp.url.clone();
        let entries = parse_multistatus(&resp.body)?;
        if entries.iter().any(|e| e.is_calendar) {
            return Ok(answered_url);
        }

        let resp = self
            .http
            .execute(
                DavRequest::new(propfind(), answered_url.clone())
                    .depth("1")
                    .content_type(XML_CONTENT_TYPE)
                    .body(PROPFIND_BODY),
            )
            .await?;
        let entries = parse_multistatus(&resp.body)?;

        let child = entries.iter().filter(|e| e.is_calendar).find(|e| {
            match calendar_name {
                Some(name) => e.display_name.as_deref() == Some(name),
                None => true,
            }
        });

        match child {
            Some(entry) => self.absolutize(&resp.url, &entry.href),
            None => Err(SyncError::NotFound(match calendar_name {
                Some(name) => format!("no calendar named '{}' under {}", name, self.base_url),
                None => format!("no calendar collection under {}", self.base_url),
            })),
        }
    }

    /// List all VEVENT resources in a collection via a `calendar-query`
    /// REPORT. Returns `(href, calendar-data)` pairs; bodies are verbatim
    /// server bytes, no iCalendar parsing is applied here.
    pub async fn list_events(&self, calendar_url: &Url) -> SyncResult<Vec<(String, String)>> {
        let resp = self
            .http
            .execute(
                DavRequest::new(report(), calendar_url.clone())
                    .depth("1")
                    .content_type(XML_CONTENT_TYPE)
                    .body(EVENTS_QUERY_BODY),
            )
            .await?;
        let entries = parse_multistatus(&resp.body)?;

        Ok(entries
            .into_iter()
            .filter_map(|e| e.calendar_data.map(|data| (e.href, data)))
            .collect())
    }

    /// Fetch a single event body.
    pub async fn fetch_event(&self, href: &str) -> SyncResult<String> {
        let url = self.absolutize(&self.base_url, href)?;
        let resp = self.http.execute(DavRequest::new(Method::GET, url)).await?;
        Ok(resp.body)
    }

    /// Upload one event as `{calendar_url}/{uid}.ics`, wrapped in a minimal
    /// `VCALENDAR`. `create` asserts the resource must not exist yet
    /// (`If-None-Match: *`). Returns the final href.
    pub async fn put_event(
        &self,
        calendar_url: &Url,
        uid: &str,
        event_body: &str,
        create: bool,
    ) -> SyncResult<String> {
        let url = event_url(calendar_url, uid)?;
        let document = ics::assemble_calendar([event_body]);

        let mut request = DavRequest::new(Method::PUT, url)
            .content_type(ics::ICS_CONTENT_TYPE)
            .body(document);
        if create {
            request = request.if_none_match();
        }

        let resp = self.http.execute(request).await?;
        Ok(resp.url.to_string())
    }

    /// Delete an event resource.
    pub async fn delete_event(&self, href: &str) -> SyncResult<()> {
        let url = self.absolutize(&self.base_url, href)?;
        self.http
            .execute(DavRequest::new(Method::DELETE, url))
            .await?;
        Ok(())
    }

    /// Create a calendar collection. Used when a destination names a
    /// calendar that does not exist yet.
    pub async fn mkcalendar(&self, calendar_url: &Url, display_name: &str) -> SyncResult<()> {
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:set>
    <d:prop>
      <d:displayname>{}</d:displayname>
    </d:prop>
  </d:set>
</c:mkcalendar>"#,
            xml_escape(display_name)
        );

        self.http
            .execute(
                DavRequest::new(mkcalendar(), calendar_url.clone())
                    .content_type(XML_CONTENT_TYPE)
                    .body(body),
            )
            .await?;
        Ok(())
    }

    /// Candidate URL for a named child collection, used together with
    /// `mkcalendar` when discovery finds nothing.
    pub fn child_collection_url(&self, calendar_name: &str) -> SyncResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}/", base, calendar_name))
            .map_err(|e| SyncError::Internal(format!("invalid calendar name: {}", e)))
    }

    /// Resolve a (possibly relative) href against the URL a response came
    /// from.
    fn absolutize(&self, answered: &Url, href: &str) -> SyncResult<Url> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Url::parse(href)
                .map_err(|e| SyncError::MalformedXml(format!("bad href '{}': {}", href, e)));
        }
        answered
            .join(href)
            .map_err(|e| SyncError::MalformedXml(format!("bad href '{}': {}", href, e)))
    }
}

/// Build the resource URL for an event within a collection.
fn event_url(calendar_url: &Url, uid: &str) -> SyncResult<Url> {
    let base = calendar_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{}/{}.ics", base, uid))
        .map_err(|e| SyncError::Internal(format!("invalid event UID '{}': {}", uid, e)))
}

fn propfind() -> Method {
    Method::from_bytes(b"PROPFIND").expect("PROPFIND is a valid method token")
}

fn report() -> Method {
    Method::from_bytes(b"REPORT").expect("REPORT is a valid method token")
}

fn mkcalendar() -> Method {
    Method::from_bytes(b"MKCALENDAR").expect("MKCALENDAR is a valid method token")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_url_joins_without_double_slash() {
        let with = Url::parse("https://x.example/cal/work/").unwrap();
        let without = Url::parse("https://x.example/cal/work").unwrap();
        assert_eq!(
            event_url(&with, "u1").unwrap().as_str(),
            "https://x.example/cal/work/u1.ics"
        );
        assert_eq!(
            event_url(&without, "u1").unwrap().as_str(),
            "https://x.example/cal/work/u1.ics"
        );
    }

    #[test]
    fn xml_escape_covers_markup_characters() {
        assert_eq!(xml_escape("a&b<c>"), "a&amp;b&lt;c&gt;");
    }
}
