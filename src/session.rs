// One orchestration run: a backend connection plus the cancellation scope it lives in
use crate::backend::{Backend, DockerCli};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::errors::Result;
use std::sync::Arc;

/// Owns the backend for the duration of a run.
///
/// Closing the session releases every container and network the backend
/// created. A session dropped without `close` (an error propagated past it,
/// or a cancelled run) tears down the same way.
pub struct Session {
    backend: Arc<dyn Backend>,
    cancel: CancelToken,
    closed: bool,
}

impl Session {
    /// Connect to the local docker daemon
    pub fn connect(config: &Config, cancel: CancelToken) -> Result<Self> {
        let backend = DockerCli::connect(&config.backend, &cancel)?;
        Ok(Self::with_backend(Arc::new(backend), cancel))
    }

    pub fn with_backend(backend: Arc<dyn Backend>, cancel: CancelToken) -> Self {
        tracing::debug!(backend = backend.name(), "session opened");
        Self {
            backend,
            cancel,
            closed: false,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.backend.teardown()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.backend.teardown() {
            tracing::warn!(error = %e, "teardown after aborted run failed");
        }
    }
}
