//! CalDAV protocol client.
//!
//! Built on raw WebDAV verbs over reqwest. The XML side is deliberately
//! namespace-oblivious and the iCalendar payloads are never validated, so
//! non-conforming servers (Feishu, some Nextcloud deployments) still sync.

mod client;
mod http;
mod xml;

pub use client::CalDavClient;
pub use http::{DavHttpClient, DavRequest, DavResponse};
pub use xml::{parse_multistatus, MultiStatusEntry};
