//! Authenticated HTTP transport for WebDAV verbs.
//!
//! Every request carries HTTP Basic credentials and a per-request timeout.
//! The slash-toggle retry lives here so every verb inherits it: some servers
//! are strict about trailing slashes on collection URLs and answer 404/405
//! for the other form.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::error::{SyncError, SyncResult};

const UPSTREAM_SNIPPET_LEN: usize = 200;

/// A WebDAV request description. Kept as plain data so a failed attempt can
/// be replayed against the slash-toggled URL.
#[derive(Debug, Clone)]
pub struct DavRequest {
    pub method: Method,
    pub url: Url,
    pub depth: Option<&'static str>,
    pub content_type: Option<&'static str>,
    pub body: Option<String>,
    /// Adds `If-None-Match: *` (create-only PUT).
    pub if_none_match: bool,
}

impl DavRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            depth: None,
            content_type: None,
            body: None,
            if_none_match: false,
        }
    }

    pub fn depth(mut self, depth: &'static str) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn if_none_match(mut self) -> Self {
        self.if_none_match = true;
        self
    }
}

/// Response of a successful WebDAV request, with the URL that actually
/// answered (the given one or its slash-toggled twin).
#[derive(Debug)]
pub struct DavResponse {
    pub status: StatusCode,
    pub body: String,
    pub url: Url,
}

/// HTTP client with credentials attached to every request.
#[derive(Debug, Clone)]
pub struct DavHttpClient {
    client: Client,
    username: String,
    password: String,
}

impl DavHttpClient {
    pub fn new(username: &str, password: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            client,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Execute a request with the quirk-retry policy: on 404 or 405, retry
    /// exactly once against the URL with its trailing slash toggled. A second
    /// failure reports the original error. 401 is terminal immediately.
    pub async fn execute(&self, request: DavRequest) -> SyncResult<DavResponse> {
        let first = self.send(&request, &request.url).await?;
        match Self::into_response(first, request.url.clone()).await {
            Ok(resp) => Ok(resp),
            Err(original) if retriable(&original) => {
                let toggled = toggle_trailing_slash(&request.url);
                tracing::debug!(
                    url = %request.url,
                    retry = %toggled,
                    "retrying with toggled trailing slash"
                );
                let second = match self.send(&request, &toggled).await {
                    Ok(resp) => resp,
                    Err(_) => return Err(original),
                };
                match Self::into_response(second, toggled).await {
                    Ok(resp) => Ok(resp),
                    Err(_) => Err(original),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn send(&self, request: &DavRequest, url: &Url) -> SyncResult<reqwest::Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .basic_auth(&self.username, Some(&self.password));

        if let Some(depth) = request.depth {
            builder = builder.header("Depth", depth);
        }
        if let Some(content_type) = request.content_type {
            builder = builder.header("Content-Type", content_type);
        }
        if request.if_none_match {
            builder = builder.header("If-None-Match", "*");
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        Ok(builder.send().await?)
    }

    async fn into_response(resp: reqwest::Response, url: Url) -> SyncResult<DavResponse> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            return Ok(DavResponse { status, body, url });
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(SyncError::Unauthorized),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(url.to_string())),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(SyncError::Conflict(format!("{} on {}", status, url)))
            }
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(SyncError::Upstream {
                    status: status.as_u16(),
                    body: snippet(&body),
                })
            }
        }
    }
}

fn retriable(e: &SyncError) -> bool {
    match e {
        SyncError::NotFound(_) => true,
        SyncError::Upstream { status, .. } => *status == 405,
        _ => false,
    }
}

/// Toggle the trailing slash on a URL's path: add if absent, remove if
/// present (but never below "/").
pub fn toggle_trailing_slash(url: &Url) -> Url {
    let mut toggled = url.clone();
    let path = url.path();
    if path.ends_with('/') {
        if path.len() > 1 {
            toggled.set_path(path.trim_end_matches('/'));
        }
    } else {
        toggled.set_path(&format!("{}/", path));
    }
    toggled
}

fn snippet(body: &str) -> String {
    let mut s: String = body.chars().take(UPSTREAM_SNIPPET_LEN).collect();
    if body.chars().count() > UPSTREAM_SNIPPET_LEN {
        s.push('…');
    }
    s
}
