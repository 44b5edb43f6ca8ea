// The docker-in-docker smoke run: daemon, binding, readiness, checks
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::container::ContainerSpec;
use crate::errors::{DindError, Result};
use crate::readiness::ReadinessGate;
use crate::session::Session;
use crate::stages::{launch_daemon, DaemonOptions, ImageResolver, ServiceBinder, VerificationRunner};
use crate::supervisor::{DaemonExit, DaemonWatch};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SmokeReport {
    /// Captured `docker info` from inside the consumer
    pub info: String,
    pub readiness_attempts: u32,
    pub daemon_exit: DaemonExit,
    /// The unbound client image the checks ran in
    pub client: ContainerSpec,
}

/// Commands run against the nested daemon once it is ready
pub fn smoke_commands(config: &Config) -> Vec<Vec<String>> {
    let smoke = &config.smoke;
    vec![
        vec!["docker".to_string(), "pull".to_string(), smoke.image.clone()],
        vec!["docker".to_string(), "images".to_string()],
        vec![
            "docker".to_string(),
            "run".to_string(),
            "-p".to_string(),
            format!("{}:{}", smoke.host_port, smoke.container_port),
            "-d".to_string(),
            smoke.image.clone(),
        ],
        vec![
            "curl".to_string(),
            format!("{}:{}", config.daemon.alias, smoke.host_port),
        ],
    ]
}

pub fn run(session: &Session, config: &Config) -> Result<SmokeReport> {
    run_with_clock(session, config, Arc::new(SystemClock))
}

/// Like `run`, printing the captured `docker info` to stdout as soon as it arrives
pub fn run_with_clock(
    session: &Session,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<SmokeReport> {
    run_reporting(session, config, clock, |info| println!("{}", info))
}

/// Run the plan, handing `docker info` to `on_info` before the smoke commands start.
///
/// The info is reported even when a later smoke command fails.
pub fn run_reporting<F>(
    session: &Session,
    config: &Config,
    clock: Arc<dyn Clock>,
    mut on_info: F,
) -> Result<SmokeReport>
where
    F: FnMut(&str),
{
    let resolver = ImageResolver::from_config(&config.images)?;
    let client = resolver.variant(&config.images.client_suffix, "base/image")?;
    let daemon_base = resolver.variant(&config.images.daemon_suffix, "daemon/image")?;

    let options = DaemonOptions::from_config(&config.daemon)?;
    let daemon = launch_daemon(session, &daemon_base, &options)?;
    let watch = DaemonWatch::spawn(daemon.process().clone(), session.cancel_token())?;

    let outcome = (|| -> Result<(String, u32)> {
        let consumer = ServiceBinder::from_config(&config.binding).bind(
            &client,
            &config.daemon.alias,
            &daemon,
        )?;
        let runner = VerificationRunner::new(session);

        let check = consumer.pipeline("readiness/check");
        let mut gate = ReadinessGate::new_with_clock(&config.readiness, clock);
        let attempts = gate.wait(session.cancel_token(), |attempt| {
            if watch.is_finished() {
                return Err(DindError::Backend(
                    "daemon exited before accepting connections".to_string(),
                ));
            }
            tracing::debug!(attempt, "checking daemon");
            runner
                .capture(&check, config.readiness.check.as_slice())
                .map(|_| ())
        })?;

        let info = runner.capture(&consumer.pipeline("docker/info"), &["docker", "info"])?;
        on_info(&info);
        runner.sync(&consumer.pipeline("docker/test"), &smoke_commands(config)[..])?;
        Ok((info, attempts))
    })();

    // The watcher is joined on every path; the daemon itself goes with the session.
    let daemon_exit = watch.stop();
    let (info, readiness_attempts) = outcome?;
    let daemon_exit = daemon_exit?;

    Ok(SmokeReport {
        info,
        readiness_attempts,
        daemon_exit,
        client,
    })
}
