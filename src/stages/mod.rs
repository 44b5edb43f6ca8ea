// The four orchestration stages, in the order a run composes them
pub mod binder;
pub mod daemon;
pub mod resolver;
pub mod verify;

pub use binder::ServiceBinder;
pub use daemon::{launch_daemon, Daemon, DaemonOptions};
pub use resolver::{resolve, ImageResolver};
pub use verify::VerificationRunner;
