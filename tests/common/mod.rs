//! Shared helpers for the integration tests.
//!
//! The fake test runner is `sh -c <script> forge ...`, so inside the script
//! `$@` holds exactly the arguments forge would have received.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use powa_devserver::config::{AppConfig, ForgeConfig};
use powa_devserver::engine::registry::ProcessRegistry;
use powa_devserver::server::routes::{AppState, ServerState};
use powa_devserver::types::StreamEvent;

/// A scratch directory used as the runner's working directory.
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("powa_it_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Forge config that runs `script` through `sh` inside `dir`.
pub fn script_forge(dir: &PathBuf, script: &str, timeout_secs: u64) -> ForgeConfig {
    ForgeConfig {
        program: "sh".to_string(),
        program_args: vec!["-c".to_string(), script.to_string(), "forge".to_string()],
        working_dir: dir.clone(),
        config_path: dir.join("test").join("powa-config.json"),
        timeout_secs,
        ..ForgeConfig::default()
    }
}

pub fn state_with(forge: ForgeConfig) -> (AppState, ProcessRegistry) {
    let registry = ProcessRegistry::new();
    let mut config = AppConfig::default();
    config.forge = forge;
    (Arc::new(ServerState::new(config, registry.clone())), registry)
}

/// Decode an SSE body into the events it carried.
pub fn parse_events(body: &[u8]) -> Vec<StreamEvent> {
    let text = std::str::from_utf8(body).unwrap();
    text.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let data = frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("unexpected frame: {frame:?}"));
            serde_json::from_str(data).unwrap()
        })
        .collect()
}

/// Exactly one `start` first and exactly one terminal event last.
pub fn assert_well_formed(events: &[StreamEvent]) {
    assert!(events.len() >= 2, "too few events: {events:?}");
    assert_eq!(events[0], StreamEvent::Start);
    assert_eq!(events.iter().filter(|e| **e == StreamEvent::Start).count(), 1);
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

/// Poll until `cond` holds, panicking after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}
