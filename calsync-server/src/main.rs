mod auth;
mod config;
mod routes;
mod state;

use std::time::{Duration, Instant};

use axum::http::{header, Method};
use axum::{middleware, Extension};
use calsync_core::{Engine, Publisher, Store};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::auth::{basic_auth_middleware, AuthConfig};
use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = AppConfig::load()?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = cfg.db_path();
    let store = Store::open(&db_path)?;
    info!("database ready at {}", db_path.display());

    let publisher = Publisher::new();
    let preloaded = publisher.preload(&store).await?;
    if preloaded > 0 {
        info!("restored {} published feeds", preloaded);
    }

    let engine = Engine::new(
        store.clone(),
        publisher.clone(),
        Duration::from_secs(cfg.http_timeout_secs),
    );
    let scheduled = engine.start()?;
    info!("scheduled {} sync units", scheduled);

    let auth_config = AuthConfig::from_config(&cfg);
    match &auth_config {
        AuthConfig::Disabled => {
            info!("HTTP Basic Auth disabled (AUTH_USERNAME not set or no password configured)");
        }
        AuthConfig::PlainText { username, .. } => {
            info!("HTTP Basic Auth enabled for user '{}' (plain text)", username);
        }
        AuthConfig::Hashed { username, .. } => {
            info!("HTTP Basic Auth enabled for user '{}' (argon2 hash)", username);
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    let state = AppState {
        store,
        engine: engine.clone(),
        publisher,
        start_time: Instant::now(),
    };

    let app = routes::build_router(state)
        .layer(middleware::from_fn(basic_auth_middleware))
        .layer(Extension(auth_config))
        .layer(cors);

    let addr = format!("{}:{}", cfg.server_host, cfg.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received terminate signal, shutting down");
        },
    }
}
