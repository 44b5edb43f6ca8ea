// Starting a nested docker daemon as a backgrounded service container
use crate::config::DaemonConfig;
use crate::container::{CacheVolume, ContainerSpec, ExecOptions, ServiceTarget};
use crate::errors::Result;
use crate::process::RunningProcess;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    pub port: u16,
    pub cache: CacheVolume,
    /// Where the cache is mounted; consumers must mount it at the same path
    pub mount_path: String,
    pub log_level: String,
}

impl DaemonOptions {
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        Ok(Self {
            port: config.port,
            cache: CacheVolume::new(config.cache_volume.as_str())?,
            mount_path: config.mount_path.clone(),
            log_level: config.log_level.clone(),
        })
    }

    /// `dockerd` listening on every interface without TLS.
    ///
    /// Unsafe outside a throwaway test network: anyone who can reach the port
    /// controls the daemon.
    pub fn start_command(&self) -> Vec<String> {
        vec![
            "dockerd".to_string(),
            format!("--log-level={}", self.log_level),
            format!("--host=tcp://0.0.0.0:{}", self.port),
            "--tls=false".to_string(),
        ]
    }
}

/// Derive the daemon's spec: cache mount, exposed port, privileged start command
pub fn daemon_spec(spec: &ContainerSpec, options: &DaemonOptions) -> ContainerSpec {
    spec.with_mounted_cache(&options.mount_path, &options.cache)
        .with_exposed_port(options.port)
        .with_exec_opts(
            options.start_command(),
            ExecOptions {
                insecure_root_capabilities: true,
            },
        )
}

/// A started daemon and what consumers need to reach it
#[derive(Debug, Clone)]
pub struct Daemon {
    spec: ContainerSpec,
    process: RunningProcess,
    options: DaemonOptions,
}

impl Daemon {
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn process(&self) -> &RunningProcess {
        &self.process
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn cache(&self) -> &CacheVolume {
        &self.options.cache
    }

    pub fn mount_path(&self) -> &str {
        &self.options.mount_path
    }

    pub fn target(&self) -> ServiceTarget {
        ServiceTarget {
            container: self.process.container().clone(),
            exposed_ports: self.spec.exposed_ports().clone(),
        }
    }
}

/// Start the daemon in the background.
///
/// Returns as soon as the container is started. The daemon is usually not
/// accepting connections yet; pass a readiness gate before using it.
pub fn launch_daemon(session: &Session, spec: &ContainerSpec, options: &DaemonOptions) -> Result<Daemon> {
    let backend = session.backend();
    let cancel = session.cancel_token();
    let spec = daemon_spec(spec, options);

    let span = tracing::info_span!("pipeline", name = %spec.pipeline_path());
    let _guard = span.enter();

    backend.ensure_image(spec.image(), cancel)?;
    let container = backend.start_service(&spec, cancel)?;
    tracing::info!(
        container = %container,
        port = options.port,
        cache = options.cache.name(),
        "daemon started"
    );

    let process = RunningProcess::new(container, "dockerd", backend.clone());
    Ok(Daemon {
        spec,
        process,
        options: options.clone(),
    })
}
