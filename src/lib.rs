// Library interface for dindrun
// The orchestration stages are usable on their own against any Backend

pub mod backend;
pub mod cancel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod container;
pub mod errors;
pub mod eval;
pub mod logging;
pub mod process;
pub mod readiness;
pub mod session;
pub mod smoke;
pub mod stages;
pub mod supervisor;
