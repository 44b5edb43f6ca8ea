// Log output goes to stdout, interleaved with command output
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "dindrun=info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; `RUST_LOG=dindrun=debug` also
/// streams every line printed by the docker processes the run spawns.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stdout),
        )
        .try_init();
}
