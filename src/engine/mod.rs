//! Run engine: spawn a forge test, relay its output, and clean up.

pub mod executor;
pub mod lifecycle;
pub mod registry;
pub mod relay;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::ForgeConfig;
use crate::types::{SimulationConfig, StreamEvent};
use executor::ForgeInvocation;
use lifecycle::{EventSink, RunOutcome};
use registry::ProcessRegistry;

/// A run that has been handed to its coordinator task.
pub struct StartedRun {
    pub id: Uuid,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub task: JoinHandle<RunOutcome>,
}

/// Start a run for an already-validated and persisted config.
///
/// The returned receiver yields `start`, the output lines, and the terminal
/// event. It is unbounded so that a client that stops reading cannot stall
/// the run; output is still capped by the run's timeout. Dropping it counts
/// as a client disconnect.
pub fn start_run(
    forge: &ForgeConfig,
    config: &SimulationConfig,
    registry: &ProcessRegistry,
) -> StartedRun {
    let id = Uuid::new_v4();
    let invocation = ForgeInvocation::new(forge, config);
    let (tx, events) = mpsc::unbounded_channel();

    info!(
        run_id = %id,
        test = %invocation.target,
        revenue_amount = config.revenue_amount(),
        epochs = config.epoch_count(),
        "Starting test run"
    );

    let task = tokio::spawn(lifecycle::drive(
        id,
        invocation,
        forge.timeout(),
        registry.clone(),
        EventSink::new(tx),
    ));

    StartedRun { id, events, task }
}
