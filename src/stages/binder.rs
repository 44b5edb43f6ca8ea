use crate::config::BindingConfig;
use crate::container::ContainerSpec;
use crate::errors::{DindError, Result};
use crate::stages::daemon::Daemon;

/// Attaches a daemon to a consumer under a DNS alias
#[derive(Debug, Clone)]
pub struct ServiceBinder {
    env_var: String,
    scheme: String,
}

impl Default for ServiceBinder {
    fn default() -> Self {
        Self::from_config(&BindingConfig::default())
    }
}

impl ServiceBinder {
    pub fn from_config(config: &BindingConfig) -> Self {
        Self {
            env_var: config.env_var.clone(),
            scheme: config.scheme.clone(),
        }
    }

    /// Address consumers use to reach the daemon, e.g. `tcp://global-dockerd:2375`
    pub fn endpoint(&self, alias: &str, daemon: &Daemon) -> String {
        format!("{}://{}:{}", self.scheme, alias, daemon.port())
    }

    /// Derive a consumer that reaches `daemon` as `alias`.
    ///
    /// The consumer gets the endpoint in its environment, the alias binding
    /// and the daemon's cache mounted at the same path.
    pub fn bind(&self, consumer: &ContainerSpec, alias: &str, daemon: &Daemon) -> Result<ContainerSpec> {
        if consumer.service(alias).is_some() {
            return Err(DindError::DuplicateAlias(alias.to_string()));
        }

        let bound = consumer
            .pipeline("docker/service")
            .with_env_variable(&self.env_var, &self.endpoint(alias, daemon))
            .with_service_binding(alias, daemon.target())?
            .with_mounted_cache(daemon.mount_path(), daemon.cache());

        tracing::debug!(
            alias,
            endpoint = %self.endpoint(alias, daemon),
            "service bound"
        );
        Ok(bound)
    }
}
