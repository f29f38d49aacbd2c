//! Registry of in-flight test processes.
//!
//! Owned by the server state and cloned into every run. It is only used to
//! report `activeTests` and to signal every child on shutdown; it never
//! limits how many runs may be active.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One registered run.
#[derive(Debug, Clone)]
struct RunEntry {
    /// `None` once the process has been reaped; the pid may be reused.
    pid: Option<u32>,
    test: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, RunEntry>> {
        // No invariant spans the lock, so a poisoned map is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, id: Uuid, pid: Option<u32>, test: &'static str) {
        self.entries().insert(id, RunEntry { pid, test });
        debug!(run_id = %id, ?pid, test, "Registered test process");
    }

    /// Forget the pid of a run whose process has exited but whose output is
    /// still draining. The run keeps counting as active.
    pub fn clear_pid(&self, id: &Uuid) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.pid = None;
        }
    }

    /// Remove a run. Returns `false` if it was already gone.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.entries().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Send SIGTERM to every registered run that still has a live process.
    /// Entries stay registered until their own lifecycle observes the exit.
    pub fn terminate_all(&self) -> usize {
        let targets: Vec<(u32, &'static str)> = self
            .entries()
            .values()
            .filter_map(|e| e.pid.map(|pid| (pid, e.test)))
            .collect();
        if !targets.is_empty() {
            info!(count = targets.len(), "Terminating active test processes");
        }
        targets
            .into_iter()
            .filter(|(pid, test)| {
                debug!(pid, test, "Terminating test process");
                send_sigterm(*pid)
            })
            .count()
    }
}

#[cfg(unix)]
pub(crate) fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "Sent SIGTERM");
            true
        }
        Err(e) => {
            warn!(pid, error = %e, "Failed to signal test process");
            false
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn send_sigterm(pid: u32) -> bool {
    warn!(pid, "Process termination is only supported on unix");
    false
}
