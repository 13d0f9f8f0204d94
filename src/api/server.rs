use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::generation::upstream::UpstreamError;
use crate::generation::GenerationService;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub generation: GenerationService,
}

impl AppState {
    pub fn new(generation: GenerationService) -> Self {
        Self {
            service_name: "coloring-bridge",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            generation,
        }
    }
}

pub fn build_router(config: &BridgeConfig) -> Result<Router, UpstreamError> {
    let generation = GenerationService::from_config(&config.upstream, config.poll_policy)?;
    Ok(build_router_with_service(generation))
}

pub fn build_router_with_service(generation: GenerationService) -> Router {
    let state = AppState::new(generation);
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/coloring",
            post(crate::api::coloring::submit_coloring_handler)
                .get(crate::api::coloring::coloring_status_handler),
        )
        .route(
            "/api/generate",
            post(crate::api::generate::generate_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: BridgeConfig) -> std::io::Result<()> {
    if config.upstream.api_key.is_none() {
        warn!("KIE_API_KEY is not set; generation requests will fail until it is configured");
    }
    let app = build_router(&config).map_err(std::io::Error::other)?;
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        bind = %config.bind,
        dialect = config.upstream.dialect.as_str(),
        poll_interval_ms = config.poll_policy.interval.as_millis() as u64,
        poll_timeout_secs = config.poll_policy.deadline.as_secs(),
        "starting coloring-bridge HTTP surface"
    );
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let policy = state.generation.policy();
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "poll_interval_ms": policy.interval.as_millis() as u64,
            "poll_timeout_secs": policy.deadline.as_secs(),
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
