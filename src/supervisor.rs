// Background watch on the daemon's exit code
use crate::cancel::CancelToken;
use crate::errors::{DindError, Result};
use crate::process::RunningProcess;
use std::thread::JoinHandle;

/// How the watched process ended, as far as the watcher knows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonExit {
    Exited(i32),
    /// The watch was stopped (or the run cancelled) while the process still ran
    Stopped,
}

/// A named thread blocked on a process's exit code.
///
/// The watcher must be ended explicitly: `stop` joins it, `detach` drops it
/// with a logged reason.
pub struct DaemonWatch {
    label: String,
    cancel: CancelToken,
    handle: Option<JoinHandle<Result<DaemonExit>>>,
}

impl DaemonWatch {
    /// Start watching. `cancel` is the run's token; the watch derives its own child.
    pub fn spawn(process: RunningProcess, cancel: &CancelToken) -> Result<Self> {
        let label = process.label().to_string();
        let cancel = cancel.child();
        let watch_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name(format!("watch-{}", label))
            .spawn(move || {
                tracing::info!(process = process.label(), "watching for exit");
                match process.exit_code(&watch_cancel) {
                    Ok(code) => {
                        if code == 0 {
                            tracing::info!(process = process.label(), code, "exited");
                        } else {
                            tracing::warn!(process = process.label(), code, "exited");
                        }
                        Ok(DaemonExit::Exited(code))
                    }
                    Err(DindError::Cancelled) => Ok(DaemonExit::Stopped),
                    Err(e) => {
                        tracing::warn!(process = process.label(), error = %e, "lost track of process");
                        Err(e)
                    }
                }
            })?;

        Ok(Self {
            label,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Stop waiting and join the watcher thread
    pub fn stop(self) -> Result<DaemonExit> {
        self.cancel.cancel();
        self.join()
    }

    /// Join without stopping; blocks until the process exits or the run is cancelled
    pub fn join(mut self) -> Result<DaemonExit> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                DindError::Backend(format!("watcher for '{}' panicked", self.label))
            })?,
            None => Ok(DaemonExit::Stopped),
        }
    }

    /// Give up on the watcher without joining it
    pub fn detach(mut self, reason: &str) {
        self.cancel.cancel();
        if self.handle.take().is_some() {
            tracing::debug!(process = %self.label, reason, "watcher detached");
        }
    }
}

impl Drop for DaemonWatch {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Reached only when a run unwinds past the watch via `?`.
            self.cancel.cancel();
            tracing::debug!(process = %self.label, "watcher dropped without join");
        }
    }
}
