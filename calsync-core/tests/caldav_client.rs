//! Wire-level client tests with wiremock.

use std::time::Duration;

use calsync_core::caldav::CalDavClient;
use calsync_core::SyncError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn calendar_propstat(href: &str, display_name: &str) -> String {
    format!(
        r#"<d:response>
    <d:href>{}</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
        <d:displayname>{}</d:displayname>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
        href, display_name
    )
}

fn multistatus(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  {}
</d:multistatus>"#,
        inner
    )
}

fn client(server: &MockServer, base_path: &str) -> CalDavClient {
    CalDavClient::new(
        &format!("{}{}", server.uri(), base_path),
        "user",
        "pass",
        TIMEOUT,
    )
    .expect("client")
}

#[tokio::test]
async fn discovery_retries_once_with_toggled_slash() {
    let server = MockServer::start().await;

    // The base URL without the slash answers 404; the slashed form is the
    // real collection. Exactly two PROPFINDs in total.
    Mock::given(method("PROPFIND"))
        .and(path("/cal"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PROPFIND"))
        .and(path("/cal/"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_raw(multistatus(&calendar_propstat("/cal/", "Work")), "application/xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal");
    let url = client.discover_calendar_url(None).await.expect("discover");
    assert!(url.path().ends_with("/cal/"));
}

#[tokio::test]
async fn second_slash_failure_reports_original_error() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/cal"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/cal/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal");
    let err = client.discover_calendar_url(None).await.unwrap_err();
    match err {
        // The original (unslashed) URL is the one reported.
        SyncError::NotFound(url) => assert!(url.ends_with("/cal")),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn successful_request_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/cal/"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_raw(multistatus(&calendar_propstat("/cal/", "Work")), "application/xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    client.discover_calendar_url(None).await.expect("discover");
}

#[tokio::test]
async fn unauthorized_is_terminal_without_slash_retry() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/cal"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/cal/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, "/cal");
    let err = client.discover_calendar_url(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
}

#[tokio::test]
async fn requests_carry_basic_auth() {
    let server = MockServer::start().await;

    // base64("user:pass")
    Mock::given(method("PROPFIND"))
        .and(path("/cal/"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_raw(multistatus(&calendar_propstat("/cal/", "Work")), "application/xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    client.discover_calendar_url(None).await.expect("discover");
}

#[tokio::test]
async fn discovery_picks_named_child_when_base_is_not_a_calendar() {
    let server = MockServer::start().await;

    let depth0 = multistatus(
        r#"<d:response>
    <d:href>/dav/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
    );
    let depth1 = multistatus(&format!(
        "{}\n{}",
        calendar_propstat("/dav/personal/", "Personal"),
        calendar_propstat("/dav/team/", "Team")
    ));

    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "0"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(depth0, "application/xml"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(depth1, "application/xml"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/dav/");
    let url = client
        .discover_calendar_url(Some("Team"))
        .await
        .expect("discover");
    assert!(url.path().ends_with("/dav/team/"));
}

#[tokio::test]
async fn discovery_of_unknown_name_is_not_found() {
    let server = MockServer::start().await;

    let depth0 = multistatus(
        r#"<d:response>
    <d:href>/dav/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
    );
    let depth1 = multistatus(&calendar_propstat("/dav/personal/", "Personal"));

    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "0"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(depth0, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(depth1, "application/xml"))
        .mount(&server)
        .await;

    let client = client(&server, "/dav/");
    let err = client
        .discover_calendar_url(Some("Missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn list_events_returns_href_body_pairs_verbatim() {
    let server = MockServer::start().await;

    let report_body = multistatus(
        r#"<d:response>
    <d:href>/cal/u1.ics</d:href>
    <d:propstat><d:prop>
      <d:getetag>"e1"</d:getetag>
      <c:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:u1
DTSTART:20250101T100000Z
X-ODDBALL;PARAM=yes:not valid per RFC but kept
END:VEVENT
END:VCALENDAR
</c:calendar-data>
    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/u2.ics</d:href>
    <d:propstat><d:prop>
      <c:calendar-data>BEGIN:VCALENDAR&#13;&#10;BEGIN:VEVENT&#13;&#10;UID:u2&#13;&#10;END:VEVENT&#13;&#10;END:VCALENDAR&#13;&#10;</c:calendar-data>
    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>"#,
    );

    Mock::given(method("REPORT"))
        .and(path("/cal/"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(report_body, "application/xml"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    let url = url::Url::parse(&format!("{}/cal/", server.uri())).unwrap();
    let events = client.list_events(&url).await.expect("list");

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "/cal/u1.ics");
    // Body is untouched, including the property no validator would accept.
    assert!(events[0].1.contains("X-ODDBALL;PARAM=yes:not valid per RFC but kept"));
    assert_eq!(events[1].0, "/cal/u2.ics");
    assert!(events[1].1.contains("UID:u2\r\n"));
}

#[tokio::test]
async fn put_event_wraps_body_and_asserts_creation() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/cal/u1.ics"))
        .and(header("Content-Type", "text/calendar; charset=utf-8"))
        .and(header("If-None-Match", "*"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    let url = url::Url::parse(&format!("{}/cal/", server.uri())).unwrap();
    let href = client
        .put_event(&url, "u1", "BEGIN:VEVENT\r\nUID:u1\r\nEND:VEVENT\r\n", true)
        .await
        .expect("put");

    assert!(href.ends_with("/cal/u1.ics"));

    // The uploaded document is a full VCALENDAR around the given block.
    let requests = server.received_requests().await.unwrap();
    let put = requests.iter().find(|r| r.method.as_str() == "PUT").unwrap();
    let body = String::from_utf8_lossy(&put.body);
    assert!(body.starts_with("BEGIN:VCALENDAR\r\n"));
    assert!(body.contains("UID:u1\r\n"));
    assert!(body.ends_with("END:VCALENDAR\r\n"));
}

#[tokio::test]
async fn put_conflict_maps_to_conflict_error() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/cal/u1.ics"))
        .respond_with(ResponseTemplate::new(412))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    let url = url::Url::parse(&format!("{}/cal/", server.uri())).unwrap();
    let err = client
        .put_event(&url, "u1", "BEGIN:VEVENT\r\nUID:u1\r\nEND:VEVENT\r\n", true)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));
}

#[tokio::test]
async fn delete_event_resolves_relative_href() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/cal/u3.ics"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    client.delete_event("/cal/u3.ics").await.expect("delete");
}

#[tokio::test]
async fn fetch_event_returns_raw_bytes() {
    let server = MockServer::start().await;

    let body = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    Mock::given(method("GET"))
        .and(path("/cal/u1.ics"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/calendar"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    let fetched = client.fetch_event("/cal/u1.ics").await.expect("fetch");
    assert_eq!(fetched, body);
}

#[tokio::test]
async fn garbage_multistatus_is_malformed_xml() {
    let server = MockServer::start().await;

    Mock::given(method("REPORT"))
        .and(path("/cal/"))
        .respond_with(
            ResponseTemplate::new(207).set_body_raw("<multistatus><respo", "application/xml"),
        )
        .mount(&server)
        .await;

    let client = client(&server, "/cal/");
    let url = url::Url::parse(&format!("{}/cal/", server.uri())).unwrap();
    let err = client.list_events(&url).await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedXml(_)));
}
