//! HTTP surface.
//!
//! `/healthz` is public. `/run`, `/stream` and `/protected/ping` require a
//! verified bearer token; the check runs before any handler, so a rejected
//! request never reaches the pipeline.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::TokenVerifier;
use crate::config::ResolvedConfig;
use crate::core::GatePipeline;
use crate::events::{self, BridgeSettings, BroadcastChannel, EventBridge, EventPublisher};

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GatePipeline>,
    pub verifier: Arc<TokenVerifier>,
    pub publisher: Arc<EventPublisher>,
    pub channel: BroadcastChannel,
    pub bridge: Arc<EventBridge>,
}

impl AppState {
    /// Wire every service from configuration
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let broker = events::connect_broker(&config.broker)
            .with_context(|| format!("Failed to open broker at {}", config.broker.address))?;

        let publisher = Arc::new(EventPublisher::new(Arc::clone(&broker)));
        let channel = BroadcastChannel::new();
        let bridge = Arc::new(EventBridge::new(
            broker,
            channel.clone(),
            Arc::clone(&publisher),
            BridgeSettings::new(config.broker.consumer_group.clone()),
        ));

        Ok(Self {
            pipeline: Arc::new(GatePipeline::from_config(config, Arc::clone(&publisher))),
            verifier: Arc::new(TokenVerifier::new(&config.identity)),
            publisher,
            channel,
            bridge,
        })
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/run", post(handlers::run))
        .route("/stream", get(sse::stream))
        .route("/protected/ping", get(handlers::ping))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_bearer,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}

/// Start the bridge and serve until Ctrl-C
pub async fn serve(config: &ResolvedConfig, listen: SocketAddr) -> Result<()> {
    let state = AppState::from_config(config)?;
    let bridge = Arc::clone(&state.bridge);

    // The stream endpoint retries on demand if this fails
    if let Err(e) = bridge.ensure_started().await {
        warn!(error = %e, "Event bridge failed to start");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("listening on http://{}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    bridge.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
