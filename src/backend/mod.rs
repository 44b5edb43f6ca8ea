/// Execution backend abstraction - what the orchestration core needs from a container engine
pub mod command;
pub mod docker;

use crate::cancel::CancelToken;
use crate::container::{ContainerId, ContainerSpec, Exec, ImageRef};
use crate::errors::Result;

pub use docker::DockerCli;

/// Result of one exec step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait that every execution backend must implement.
///
/// The orchestration core only sequences these primitives: evaluating a
/// spec's exec chain, binding services and tearing down happen on top of
/// them. Every blocking call takes the run's `CancelToken` and must return
/// `DindError::Cancelled` promptly once it is cancelled.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make `image` available locally, pulling it if needed.
    ///
    /// Failures are reported as `DindError::Resolution`.
    fn ensure_image(&self, image: &ImageRef, cancel: &CancelToken) -> Result<()>;

    /// Start a service container detached.
    ///
    /// The spec's single exec (if any) is the long-running start command.
    /// Returns as soon as the container is started, not when it is ready.
    fn start_service(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<ContainerId>;

    /// Create an idle container carrying the spec's env, cache mounts and
    /// service bindings, ready to have its exec chain run inside it
    fn create_consumer(&self, spec: &ContainerSpec, cancel: &CancelToken)
        -> Result<ContainerId>;

    /// Run one exec step inside `container`.
    ///
    /// A non-zero exit is returned as output, not as an error.
    fn exec(&self, container: &ContainerId, exec: &Exec, cancel: &CancelToken)
        -> Result<ExecOutput>;

    /// Block until `container` exits and return its exit code
    fn wait(&self, container: &ContainerId, cancel: &CancelToken) -> Result<i32>;

    /// Combined stdout/stderr of `container` so far
    fn logs(&self, container: &ContainerId) -> Result<String>;

    /// Snapshot `container`'s filesystem as image `reference`
    fn commit(&self, container: &ContainerId, reference: &ImageRef, cancel: &CancelToken)
        -> Result<()>;

    /// Push `reference` to its registry, returning the published reference
    fn push(&self, reference: &ImageRef, cancel: &CancelToken) -> Result<String>;

    /// Stop and delete `container`
    fn remove(&self, container: &ContainerId) -> Result<()>;

    /// Release everything this backend created during the run
    fn teardown(&self) -> Result<()>;
}
