use crate::errors::{DindError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = ".dindrun.yml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub binding: BindingConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub smoke: SmokeConfig,
}

/// Base image and the tag suffixes that select the client and daemon variants
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ImagesConfig {
    pub base: String,
    pub client_suffix: String,
    pub daemon_suffix: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            base: "docker:24".to_string(),
            client_suffix: "-cli".to_string(),
            daemon_suffix: "-dind".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub alias: String,
    pub cache_volume: String,
    pub mount_path: String,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 2375,
            alias: "global-dockerd".to_string(),
            cache_volume: "shared-tmp".to_string(),
            mount_path: "/tmp".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How consumers learn where the bound service lives
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BindingConfig {
    pub env_var: String,
    pub scheme: String,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            env_var: "DOCKER_HOST".to_string(),
            scheme: "tcp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_seconds: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
    /// Command run in the bound consumer; the daemon is ready once it exits 0
    pub check: Vec<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
            max_attempts: None,
            check: vec!["docker".to_string(), "info".to_string()],
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Docker CLI binary
    pub program: String,
    pub allow_privileged: bool,
    pub command_timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            allow_privileged: true,
            command_timeout_seconds: 600,
        }
    }
}

impl BackendConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

/// Image the smoke checks pull and serve through the nested daemon
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SmokeConfig {
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            image: "nginxdemos/hello".to_string(),
            host_port: 4000,
            container_port: 80,
        }
    }
}

impl Config {
    /// Load config from .dindrun.yml in `dir`, falling back to defaults
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| DindError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daemon.port == 0 {
            return Err(DindError::ConfigError(
                "daemon.port must be non-zero".to_string(),
            ));
        }
        if self.smoke.host_port == 0 || self.smoke.container_port == 0 {
            return Err(DindError::ConfigError(
                "smoke ports must be non-zero".to_string(),
            ));
        }
        if self.readiness.check.is_empty() {
            return Err(DindError::ConfigError(
                "readiness.check must name a command".to_string(),
            ));
        }
        if self.readiness.initial_backoff_ms == 0
            || self.readiness.initial_backoff_ms > self.readiness.max_backoff_ms
        {
            return Err(DindError::ConfigError(format!(
                "readiness backoff must satisfy 0 < initial ({}ms) <= max ({}ms)",
                self.readiness.initial_backoff_ms, self.readiness.max_backoff_ms
            )));
        }
        if self.readiness.max_attempts == Some(0) {
            return Err(DindError::ConfigError(
                "readiness.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
