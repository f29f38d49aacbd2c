//! POWA dev server
//!
//! Entry point. Loads configuration, initialises structured logging,
//! checks that forge is available, and serves the runner API until a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use powa_devserver::config::AppConfig;
use powa_devserver::engine::executor::locate_program;
use powa_devserver::engine::registry::ProcessRegistry;
use powa_devserver::server::{self, routes::ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let mut cfg = AppConfig::load_or_default()?;

    init_logging();

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    cfg.forge = cfg.forge.resolve(&cwd);
    if cfg.server.index_path.is_relative() {
        cfg.server.index_path = cwd.join(&cfg.server.index_path);
    }

    match locate_program(&cfg.forge.program) {
        Some(path) => info!(program = %path.display(), "Found test runner"),
        None => warn!(
            program = %cfg.forge.program,
            "Test runner not found on PATH; install Foundry or set forge.program in powa.toml"
        ),
    }

    let addr = cfg.server.socket_addr()?;
    let grace = cfg.server.shutdown_grace();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let registry = ProcessRegistry::new();
    let panic_shutdown = server::ShutdownTrigger::new();
    server::install_panic_hook(panic_shutdown.clone());

    info!(
        url = %format!("http://localhost:{}", addr.port()),
        working_dir = %cfg.forge.working_dir.display(),
        config_path = %cfg.forge.config_path.display(),
        timeout_secs = cfg.forge.timeout_secs,
        "POWA dev server running. Press Ctrl+C to stop."
    );

    let state = Arc::new(ServerState::new(cfg, registry));
    server::serve(listener, state, server::shutdown_requested(panic_shutdown), grace).await
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("powa_devserver=info"));

    let json_logging = std::env::var("POWA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
