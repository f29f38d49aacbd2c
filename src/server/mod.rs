//! HTTP server: routes, CORS, and graceful shutdown.
//!
//! The server keeps no state of its own beyond `ServerState`; every run
//! lives in its own coordinator task and is tracked in the injected
//! process registry.

pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/run-test", post(routes::run_test))
        .route("/health", get(routes::health))
        .route("/", get(routes::index))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then terminate every registered test
/// process and give open streams `grace` to finish before returning.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F, grace: Duration) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = build_router(state);
    let draining = Arc::new(Notify::new());

    let on_shutdown = {
        let registry = registry.clone();
        let draining = draining.clone();
        async move {
            shutdown.await;
            info!("Shutdown signal received, no longer accepting connections");
            registry.terminate_all();
            draining.notify_one();
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(on_shutdown)
        .into_future();

    tokio::select! {
        result = server => {
            if let Err(e) = &result {
                warn!(error = %e, "Server stopped with an error");
                registry.terminate_all();
            }
            result.context("Server error")?;
        }
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                active_tests = registry.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed with streams still open"
            );
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle through which a panic hook asks the server to shut down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger(Arc<Notify>);

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. A request made before anyone waits is kept.
    pub fn fire(&self) {
        self.0.notify_one();
    }

    pub async fn fired(&self) {
        self.0.notified().await
    }
}

/// Resolves on SIGINT, SIGTERM, or a `trigger` request.
pub async fn shutdown_requested(trigger: ShutdownTrigger) {
    tokio::select! {
        _ = shutdown_signal() => {},
        _ = trigger.fired() => warn!("Shutting down after an unexpected panic"),
    }
}

/// Log panics through `tracing` and request a graceful shutdown. The
/// shutdown path is what terminates test processes; the hook itself never
/// signals anything, since a panic in one task says nothing about the
/// other runs.
pub fn install_panic_hook(trigger: ShutdownTrigger) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        tracing::error!(panic = %panic, "Unexpected panic");
        trigger.fire();
        default_hook(panic);
    }));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
