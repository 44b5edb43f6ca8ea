use crate::backend::Backend;
use crate::cancel::CancelToken;
use crate::container::ContainerId;
use crate::errors::Result;
use std::sync::Arc;

/// Handle to a process running detached inside a container
#[derive(Clone)]
pub struct RunningProcess {
    container: ContainerId,
    label: String,
    backend: Arc<dyn Backend>,
}

impl RunningProcess {
    pub fn new(container: ContainerId, label: &str, backend: Arc<dyn Backend>) -> Self {
        Self {
            container,
            label: label.to_string(),
            backend,
        }
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block until the process exits
    pub fn exit_code(&self, cancel: &CancelToken) -> Result<i32> {
        self.backend.wait(&self.container, cancel)
    }

    /// Everything the process printed so far
    pub fn logs(&self) -> Result<String> {
        self.backend.logs(&self.container)
    }
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("container", &self.container)
            .field("label", &self.label)
            .field("backend", &self.backend.name())
            .finish()
    }
}
