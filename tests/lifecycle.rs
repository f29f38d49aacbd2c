//! Coordinator-level tests: timeouts, disconnects and event ordering,
//! driven without the HTTP layer.

#![cfg(unix)]

mod common;

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use common::*;
use powa_devserver::engine::executor::ForgeInvocation;
use powa_devserver::engine::lifecycle::{drive, EventSink, RunOutcome};
use powa_devserver::engine::registry::ProcessRegistry;
use powa_devserver::engine::start_run;
use powa_devserver::types::{SimulationConfig, StreamEvent};

fn sample_config() -> SimulationConfig {
    SimulationConfig::validate(json!({ "revenueAmount": 1000, "epochs": [1, 2, 3] })).unwrap()
}

async fn collect(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_sub_second_timeout_terminates_process() {
    let dir = scratch_dir();
    let forge = script_forge(&dir, "exec sleep 30", 60);
    let invocation = ForgeInvocation::new(&forge, &sample_config());
    let registry = ProcessRegistry::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(drive(
        Uuid::new_v4(),
        invocation,
        Duration::from_millis(300),
        registry.clone(),
        EventSink::new(tx),
    ));

    let events = tokio::time::timeout(Duration::from_secs(10), collect(rx))
        .await
        .expect("stream should close after the timeout");
    let outcome = task.await.unwrap();

    assert_eq!(outcome, RunOutcome::TimedOut);
    assert_well_formed(&events);
    assert!(matches!(events.last(), Some(StreamEvent::Error { error }) if error.contains("timed out")));
    assert!(registry.is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_timeout_fires_while_client_is_not_reading() {
    let dir = scratch_dir();
    let script = "i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done; exec sleep 30";
    let forge = script_forge(&dir, script, 1);
    let registry = ProcessRegistry::new();

    let mut run = start_run(&forge, &sample_config(), &registry);
    assert_eq!(run.events.recv().await, Some(StreamEvent::Start));

    // Nothing is read while the runner floods output and then hangs.
    let outcome = tokio::time::timeout(Duration::from_secs(5), &mut run.task)
        .await
        .expect("timeout must not wait for the client to read")
        .unwrap();
    assert_eq!(outcome, RunOutcome::TimedOut);
    assert!(registry.is_empty());

    let rest = collect(run.events).await;
    let lines = rest
        .iter()
        .filter(|e| matches!(e, StreamEvent::Stdout { .. }))
        .count();
    assert_eq!(lines, 2000);
    assert!(matches!(rest.last(), Some(StreamEvent::Error { error }) if error == "Test timed out after 1 seconds"));
    assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_disconnect_terminates_without_terminal_event() {
    let dir = scratch_dir();
    let forge = script_forge(&dir, "echo $$; exec sleep 30", 60);
    let registry = ProcessRegistry::new();

    let mut run = start_run(&forge, &sample_config(), &registry);
    assert_eq!(run.events.recv().await, Some(StreamEvent::Start));
    let pid: i32 = match run.events.recv().await {
        Some(StreamEvent::Stdout { data }) => data.parse().unwrap(),
        other => panic!("expected the shell pid, got {other:?}"),
    };
    assert_eq!(registry.len(), 1);

    drop(run.events);
    let outcome = tokio::time::timeout(Duration::from_secs(5), run.task)
        .await
        .expect("coordinator should finish promptly after disconnect")
        .unwrap();

    assert_eq!(outcome, RunOutcome::Disconnected);
    assert!(registry.is_empty());
    // The coordinator reaped the child, so the pid no longer exists.
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
    assert!(!alive, "test process should be gone");
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_all_output_precedes_complete() {
    let dir = scratch_dir();
    let script = "i=0; while [ $i -lt 200 ]; do echo line$i; echo err$i >&2; i=$((i+1)); done";
    let forge = script_forge(&dir, script, 60);
    let registry = ProcessRegistry::new();

    let run = start_run(&forge, &sample_config(), &registry);
    let events = collect(run.events).await;
    assert_eq!(run.task.await.unwrap(), RunOutcome::Completed(Some(0)));

    assert_well_formed(&events);
    assert_eq!(events.len(), 2 + 400);

    // Each pipe keeps its own order even though the two interleave.
    let stdout: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Stdout { data } => Some(data.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = (0..200).map(|i| format!("line{i}")).collect();
    assert_eq!(stdout, expected);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_signalled_exit_reports_null_code() {
    let dir = scratch_dir();
    let forge = script_forge(&dir, "kill -TERM $$", 60);
    let registry = ProcessRegistry::new();

    let run = start_run(&forge, &sample_config(), &registry);
    let events = collect(run.events).await;
    assert_eq!(run.task.await.unwrap(), RunOutcome::Completed(None));
    assert_eq!(events.last(), Some(&StreamEvent::Complete { code: None }));
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_shutdown_terminates_every_run() {
    let dir = scratch_dir();
    let forge = script_forge(&dir, "exec sleep 30", 60);
    let registry = ProcessRegistry::new();

    let first = start_run(&forge, &sample_config(), &registry);
    let second = start_run(&forge, &sample_config(), &registry);
    wait_until(|| registry.len() == 2).await;

    assert_eq!(registry.terminate_all(), 2);

    for run in [first, second] {
        let events = tokio::time::timeout(Duration::from_secs(5), collect(run.events))
            .await
            .expect("stream should end once the process is signalled");
        assert_eq!(events.last(), Some(&StreamEvent::Complete { code: None }));
        assert_eq!(run.task.await.unwrap(), RunOutcome::Completed(None));
    }
    assert!(registry.is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_exited_process_is_not_signalled_while_output_drains() {
    let dir = scratch_dir();
    // The shell exits at once; the background sleep keeps both pipes open.
    let forge = script_forge(&dir, "sleep 1 & exit 0", 60);
    let registry = ProcessRegistry::new();

    let run = start_run(&forge, &sample_config(), &registry);
    wait_until(|| registry.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still active, but its reaped pid is no longer a target.
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.terminate_all(), 0);

    let events = tokio::time::timeout(Duration::from_secs(10), collect(run.events))
        .await
        .expect("stream should end once the pipes close");
    assert_eq!(events.last(), Some(&StreamEvent::Complete { code: Some(0) }));
    assert_eq!(run.task.await.unwrap(), RunOutcome::Completed(Some(0)));
    assert!(registry.is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}
