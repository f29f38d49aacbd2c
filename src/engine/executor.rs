//! Test process executor.
//!
//! Turns a validated simulation config into a `forge test` invocation and
//! spawns it. What happens to the running process is the lifecycle
//! coordinator's business.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::info;

use crate::config::ForgeConfig;
use crate::types::{RunError, SimulationConfig, TestTarget};

/// Verbosity flag handed to forge so traces show up in the stream.
const VERBOSITY: &str = "-vvv";

/// A fully-derived command line for one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub target: TestTarget,
}

impl ForgeInvocation {
    pub fn new(forge: &ForgeConfig, config: &SimulationConfig) -> Self {
        let target = config.test_target();
        let mut args = forge.program_args.clone();
        args.extend(
            [
                "test",
                "--match-contract",
                forge.contract.as_str(),
                "--match-test",
                target.test_name(),
                VERBOSITY,
            ]
            .map(String::from),
        );

        Self {
            program: forge.program.clone(),
            args,
            working_dir: forge.working_dir.clone(),
            target,
        }
    }

    /// Build the tokio command: piped output, no stdin, colour disabled.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn spawn(&self) -> Result<Child, RunError> {
        let child = self.command().spawn().map_err(|source| RunError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        info!(
            pid = ?child.id(),
            program = %self.program,
            test = %self.target,
            cwd = %self.working_dir.display(),
            "Test process started"
        );
        Ok(child)
    }
}

/// Find `program` the way the OS would when spawning it: paths are checked
/// as-is, bare names are searched on `PATH`. Only executables match.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
