//! Published feed serving.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ics/{path}", get(serve_ics))
}

async fn serve_ics(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    match state.publisher.get(&path).await {
        Some(calendar) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, calendar.content_type)
            .header(
                header::LAST_MODIFIED,
                calendar
                    .last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            )
            .body(Body::from(calendar.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        None => (StatusCode::NOT_FOUND, "feed not found").into_response(),
    }
}
