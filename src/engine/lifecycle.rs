//! Lifecycle coordinator for a single test run.
//!
//! One coordinator task owns the child process and is the only writer to
//! the client's event stream. It waits for whichever comes first: the
//! process exiting, the process failing, the timeout, or the client going
//! away. Whatever happens, at most one terminal event is written and the
//! registry entry is removed.
//!
//! Writes to the client never wait on the client. A stalled reader cannot
//! hold off the timeout or the disconnect check.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::ForgeInvocation;
use super::registry::{send_sigterm, ProcessRegistry};
use super::relay::spawn_relay;
use crate::types::{OutputKind, RunError, StreamEvent};

/// Buffer between the relays and the coordinator.
const OUTPUT_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Stream open, process not yet spawned. Only `start` is written.
    Pending,
    /// Process spawned. Only output is written.
    Running,
    /// Terminal event sent (or client gone). Nothing more is written.
    Terminated,
}

/// The client side of a run: a channel feeding the SSE response, guarded so
/// nothing is written after the terminal event.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    state: LifecycleState,
    client_gone: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            tx,
            state: LifecycleState::Pending,
            client_gone: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn mark_running(&mut self) {
        if self.state == LifecycleState::Pending {
            self.state = LifecycleState::Running;
        }
    }

    /// Forward a non-terminal event. Events that don't belong to the current
    /// state are dropped. Send failures are logged and swallowed.
    pub fn emit(&mut self, event: StreamEvent) {
        debug_assert!(!event.is_terminal(), "use finish() for terminal events");
        let accepted = match event {
            StreamEvent::Start => self.state == LifecycleState::Pending,
            _ => self.state == LifecycleState::Running,
        };
        if self.client_gone {
            return;
        }
        if !accepted {
            debug!(state = ?self.state, "Dropping out-of-state event");
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("Client disconnected, dropping further output");
            self.client_gone = true;
        }
    }

    /// Write the terminal event and close. Returns `false` (and writes
    /// nothing) if the run was already terminated.
    pub fn finish(&mut self, event: StreamEvent) -> bool {
        if self.state == LifecycleState::Terminated {
            return false;
        }
        self.state = LifecycleState::Terminated;
        if !self.client_gone && self.tx.send(event).is_err() {
            debug!("Client disconnected before terminal event");
            self.client_gone = true;
        }
        true
    }

    /// Terminate without writing anything, for when the client is gone.
    pub fn abandon(&mut self) {
        self.state = LifecycleState::Terminated;
        self.client_gone = true;
    }

    /// Resolves once the client has dropped the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited; `None` means it was killed by a signal.
    Completed(Option<i32>),
    /// Spawning or waiting on the process failed.
    Failed(String),
    TimedOut,
    /// The client went away first. No terminal event was written.
    Disconnected,
}

/// Drive one run to completion.
///
/// Emits `start`, spawns the process, relays its output and finishes the
/// sink according to whichever termination source fires first.
pub async fn drive(
    id: Uuid,
    invocation: ForgeInvocation,
    timeout: Duration,
    registry: ProcessRegistry,
    mut sink: EventSink,
) -> RunOutcome {
    sink.emit(StreamEvent::Start);

    let mut child = match invocation.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(run_id = %id, error = %e, "Test process failed to start");
            let message = e.to_string();
            sink.finish(StreamEvent::error(message.clone()));
            return RunOutcome::Failed(message);
        }
    };
    let pid = child.id();
    registry.insert(id, pid, invocation.target.test_name());
    sink.mark_running();

    let (line_tx, mut line_rx) = mpsc::channel(OUTPUT_BUFFER);
    if let Some(stdout) = child.stdout.take() {
        spawn_relay(stdout, OutputKind::Stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_relay(stderr, OutputKind::Stderr, line_tx.clone());
    }
    drop(line_tx);

    let outcome = {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let wait = child.wait();
        tokio::pin!(wait);

        let mut exit: Option<ExitStatus> = None;
        let mut output_open = true;

        loop {
            tokio::select! {
                line = line_rx.recv(), if output_open => match line {
                    Some(event) => sink.emit(event),
                    None => output_open = false,
                },
                status = &mut wait, if exit.is_none() => match status {
                    Ok(status) => {
                        // Reaped: the pid may be reused from here on.
                        registry.clear_pid(&id);
                        exit = Some(status);
                    }
                    Err(e) => break RunOutcome::Failed(RunError::Wait(e).to_string()),
                },
                _ = &mut deadline => {
                    if let (None, Some(pid)) = (exit, pid) {
                        send_sigterm(pid);
                    }
                    break RunOutcome::TimedOut;
                }
                _ = sink.closed() => {
                    if let (None, Some(pid)) = (exit, pid) {
                        send_sigterm(pid);
                    }
                    break RunOutcome::Disconnected;
                }
            }

            // Close fires only once the exit is seen and both pipes drained,
            // so every line precedes `complete`.
            if let (Some(status), false) = (exit, output_open) {
                break RunOutcome::Completed(status.code());
            }
        }
    };
    // Timer and pending wait are gone; nothing else will signal this pid.
    registry.remove(&id);
    drop(line_rx);

    match &outcome {
        RunOutcome::Completed(code) => {
            info!(run_id = %id, ?code, test = %invocation.target, "Test process exited");
            sink.finish(StreamEvent::Complete { code: *code });
        }
        RunOutcome::Failed(message) => {
            warn!(run_id = %id, error = %message, "Test process failed");
            sink.finish(StreamEvent::error(message.clone()));
        }
        RunOutcome::TimedOut => {
            warn!(run_id = %id, timeout_secs = timeout.as_secs(), "Test process timed out");
            let message = RunError::Timeout {
                secs: timeout.as_secs(),
            }
            .to_string();
            sink.finish(StreamEvent::error(message));
        }
        RunOutcome::Disconnected => {
            info!(run_id = %id, "Client disconnected, test process terminated");
            sink.abandon();
        }
    }
    // Ends the SSE response before reaping.
    drop(sink);

    if !matches!(outcome, RunOutcome::Completed(_)) {
        match child.wait().await {
            Ok(status) => debug!(run_id = %id, ?status, "Reaped test process"),
            Err(e) => warn!(run_id = %id, error = %e, "Failed to reap test process"),
        }
    }

    outcome
}
