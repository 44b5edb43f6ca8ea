use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DindError {
    #[error("Failed to resolve image '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("Service alias '{0}' is already bound on this container")]
    DuplicateAlias(String),

    #[error("Service bound as '{0}' does not expose any port")]
    NoExposedPort(String),

    #[error("Command {:?} exited with code {exit_code}: {}", .command, .stderr.trim())]
    Execution {
        command: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service '{0}' is not running")]
    ServiceNotRunning(String),

    #[error("Daemon not ready after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    NotReady {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("Invalid container spec: {0}")]
    InvalidSpec(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DindError {
    /// Whether a readiness check may retry after this error.
    ///
    /// A daemon that is still booting shows up either as a failing command
    /// inside the consumer or as a service container that is not running yet.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DindError::Execution { .. } | DindError::ServiceNotRunning(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DindError>;
