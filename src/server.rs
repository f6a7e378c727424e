//! HTTP API consumed by the browser extension.
//!
//! Three endpoints: a liveness ping, a scrape-service status probe, and the
//! processing endpoint itself. Every processing outcome is answered with
//! HTTP 200 and a `success`-tagged JSON envelope; the extension switches on
//! the flag, not the status code.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::fetcher::ScrapeRequest;
use crate::pipeline::{PageProcessor, PipelineResult};

#[derive(Clone)]
pub struct AppState {
    processor: Arc<PageProcessor>,
    scrape_service_configured: bool,
}

impl AppState {
    pub fn new(processor: Arc<PageProcessor>, scrape_service_configured: bool) -> Self {
        Self {
            processor,
            scrape_service_configured,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    #[serde(default)]
    url: String,
    /// Processing mode; only "summarize" is supported.
    #[serde(default = "default_mode")]
    mode: String,
    /// Run cookie-consent automation before scraping.
    #[serde(default)]
    bypass_cookies: bool,
}

fn default_mode() -> String {
    "summarize".to_string()
}

pub fn router(state: AppState) -> Router {
    // Extension content scripts call from arbitrary origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/firecrawl/status", get(scrape_status))
        .route("/api/process", post(process))
        .layer(cors)
        .with_state(state)
}

/// Build the processor from config and serve until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let processor = Arc::new(PageProcessor::from_config(&config)?);
    let state = AppState::new(processor.clone(), config.scrape_service_configured());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, "API server listening");
    axum::serve(listener, router(state)).await?;

    processor.shutdown().await;
    Ok(())
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn scrape_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "configured": state.scrape_service_configured,
        "available": state.scrape_service_configured,
    }))
}

async fn process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Json<PipelineResult> {
    if request.url.trim().is_empty() {
        return Json(PipelineResult::failure("missing required field: url"));
    }
    if request.mode != "summarize" {
        return Json(PipelineResult::failure(format!(
            "unsupported mode: {}",
            request.mode
        )));
    }

    let mut scrape = ScrapeRequest::for_url(request.url.trim());
    scrape.bypass_cookies = request.bypass_cookies;

    Json(state.processor.process_request(&scrape).await)
}
