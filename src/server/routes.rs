//! HTTP route handlers.
//!
//! State is shared via `Arc<ServerState>`.

use axum::{
    body::Bytes,
    extract::State,
    response::{
        sse::{Event, Sse},
        Html,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::config::{AppConfig, ForgeConfig};
use crate::engine::{self, registry::ProcessRegistry};
use crate::storage;
use crate::types::SimulationConfig;

/// Served at `/` when the front-end file is missing.
const FALLBACK_INDEX_HTML: &str = include_str!("templates/index.html");

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ServerState {
    pub config: AppConfig,
    pub registry: ProcessRegistry,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(config: AppConfig, registry: ProcessRegistry) -> Self {
        Self {
            config,
            registry,
            started_at: Utc::now(),
        }
    }

    fn forge(&self) -> &ForgeConfig {
        &self.config.forge
    }
}

pub type AppState = Arc<ServerState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub active_tests: usize,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /run-test
///
/// Validation and config-write failures come back as JSON errors. Once the
/// run starts everything, including failures, arrives on the event stream.
pub async fn run_test(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let config = SimulationConfig::from_slice(&body)?;
    storage::write_config(&config, &state.forge().config_path).await?;

    let run = engine::start_run(state.forge(), &config, &state.registry);
    debug!(run_id = %run.id, "Streaming test output");

    let stream = UnboundedReceiverStream::new(run.events).map(|event| {
        Event::default().json_data(&event).inspect_err(|e| {
            warn!(error = %e, "Failed to encode stream event");
        })
    });
    Ok(Sse::new(stream))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "POWA dev server is running",
        active_tests: state.registry.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let path = &state.config.server.index_path;
    match tokio::fs::read_to_string(path).await {
        Ok(html) => Html(html),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Front-end page not found, serving fallback");
            Html(FALLBACK_INDEX_HTML.to_string())
        }
    }
}
