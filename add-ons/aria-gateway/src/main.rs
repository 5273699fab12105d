//! Axum-based voice relay gateway: session issuance over HTTP, one
//! ConnectionRelay per WebSocket upgrade. Config-driven via RelayConfig.

use anyhow::Context;
use aria_core::RelayConfig;
use aria_gateway::relay::{run_sweeper, ws_handler};
use aria_gateway::session::create_session_handler;
use aria_gateway::{AppState, KeywordGuard, SledMemoryStore};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first: the upstream API key stays backend-only.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "aria_gateway=info,aria=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env();
    if config.upstream_api_key.is_none() {
        info!("ARIA_UPSTREAM_API_KEY not set: sessions will fail with a configuration error");
    }

    let memory = SledMemoryStore::new().context("opening message store")?;
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(KeywordGuard::from_env()),
        Arc::new(memory),
    ));

    tokio::spawn(run_sweeper(Arc::clone(&state)));

    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(
        "aria gateway listening on {} (capacity {}, heartbeat {}s)",
        config.bind_addr, config.max_connections, config.heartbeat_secs
    );

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

fn build_app(state: Arc<aria_gateway::AppState>) -> Router {
    Router::new()
        .route("/session", post(create_session_handler))
        .route("/session/ws", get(ws_handler))
        .route("/healthz", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
