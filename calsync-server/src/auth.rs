//! Optional HTTP Basic authentication at the perimeter.
//!
//! Enabled by `AUTH_USERNAME` plus either `AUTH_PASSWORD` (plaintext) or
//! `AUTH_PASSWORD_HASH` (argon2id PHC string). Comparisons are constant-time.
//! The plain health endpoint stays reachable for load balancers.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::config::AppConfig;

const AUTH_EXEMPT_PATHS: &[&str] = &["/api/health"];

#[derive(Clone)]
pub enum AuthConfig {
    Disabled,
    PlainText {
        username: String,
        password: String,
    },
    Hashed {
        username: String,
        password_hash: String,
    },
}

impl AuthConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let Some(username) = cfg.auth_username.as_deref().filter(|s| !s.is_empty()) else {
            return Self::Disabled;
        };

        if let Some(hash) = cfg.auth_password_hash.as_deref().filter(|s| !s.is_empty()) {
            return Self::Hashed {
                username: username.to_owned(),
                password_hash: hash.to_owned(),
            };
        }

        if let Some(password) = cfg.auth_password.as_deref().filter(|s| !s.is_empty()) {
            return Self::PlainText {
                username: username.to_owned(),
                password: password.to_owned(),
            };
        }

        Self::Disabled
    }

    /// Check a credential pair against this configuration.
    fn verify(&self, username: &str, password: &str) -> bool {
        match self {
            AuthConfig::Disabled => true,
            AuthConfig::PlainText {
                username: expected_user,
                password: expected_pass,
            } => {
                let user_ok = username.as_bytes().ct_eq(expected_user.as_bytes());
                let pass_ok = password.as_bytes().ct_eq(expected_pass.as_bytes());
                (user_ok & pass_ok).unwrap_u8() == 1
            }
            AuthConfig::Hashed {
                username: expected_user,
                password_hash,
            } => {
                if username.as_bytes().ct_eq(expected_user.as_bytes()).unwrap_u8() != 1 {
                    return false;
                }
                let Ok(parsed) = PasswordHash::new(password_hash) else {
                    tracing::error!("AUTH_PASSWORD_HASH is not a valid PHC-format hash");
                    return false;
                };
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            }
        }
    }
}

pub async fn basic_auth_middleware(
    Extension(config): Extension<AuthConfig>,
    req: Request,
    next: Next,
) -> Response {
    if matches!(config, AuthConfig::Disabled) {
        return next.run(req).await;
    }

    if AUTH_EXEMPT_PATHS.iter().any(|p| req.uri().path() == *p) {
        return next.run(req).await;
    }

    let Some((username, password)) = extract_credentials(&req) else {
        return unauthorized();
    };

    if !config.verify(&username, &password) {
        return unauthorized();
    }

    next.run(req).await
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"calsync\""),
        )
        .body(Body::from("Unauthorized"))
        .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response())
}

fn extract_credentials(req: &Request) -> Option<(String, String)> {
    let auth_header = req.headers().get(header::AUTHORIZATION)?;
    let auth_str = auth_header.to_str().ok()?;
    let encoded = auth_str.strip_prefix("Basic ")?;
    let decoded_bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded_bytes).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}
