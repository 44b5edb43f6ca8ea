// Container specs: immutable, layered descriptions of containers-to-be
pub mod cache;
pub mod image;

pub use cache::CacheVolume;
pub use image::ImageRef;

use crate::errors::{DindError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Backend-assigned identifier of a created container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for a single exec step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Run with full root capabilities (needed to nest a container runtime)
    pub insecure_root_capabilities: bool,
}

/// One command in a container's exec chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exec {
    pub args: Vec<String>,
    pub options: ExecOptions,
}

/// The running container a binding points at, plus the ports it accepts connections on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub container: ContainerId,
    pub exposed_ports: BTreeSet<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub alias: String,
    pub target: ServiceTarget,
}

#[derive(Debug, Clone, PartialEq)]
struct SpecState {
    image: ImageRef,
    pipeline: Vec<String>,
    env: BTreeMap<String, String>,
    exposed_ports: BTreeSet<u16>,
    mounts: BTreeMap<String, CacheVolume>,
    execs: Vec<Exec>,
    services: BTreeMap<String, ServiceBinding>,
}

/// Description of a container to be run by a backend.
///
/// Every `with_*` call returns a new spec and leaves the receiver untouched.
/// Clones share their state until one of them is derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    state: Arc<SpecState>,
}

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid alias regex")
    })
}

impl ContainerSpec {
    pub fn from_image(image: ImageRef) -> Self {
        Self {
            state: Arc::new(SpecState {
                image,
                pipeline: Vec::new(),
                env: BTreeMap::new(),
                exposed_ports: BTreeSet::new(),
                mounts: BTreeMap::new(),
                execs: Vec::new(),
                services: BTreeMap::new(),
            }),
        }
    }

    fn derive(&self, update: impl FnOnce(&mut SpecState)) -> Self {
        let mut next = self.clone();
        update(Arc::make_mut(&mut next.state));
        next
    }

    /// Label subsequent work on this spec, e.g. `docker/info`; shows up in log spans
    pub fn pipeline(&self, name: &str) -> Self {
        self.derive(|s| s.pipeline.push(name.to_string()))
    }

    pub fn with_env_variable(&self, name: &str, value: &str) -> Self {
        self.derive(|s| {
            s.env.insert(name.to_string(), value.to_string());
        })
    }

    pub fn with_exposed_port(&self, port: u16) -> Self {
        self.derive(|s| {
            s.exposed_ports.insert(port);
        })
    }

    pub fn with_mounted_cache(&self, path: &str, cache: &CacheVolume) -> Self {
        self.derive(|s| {
            s.mounts.insert(path.to_string(), cache.clone());
        })
    }

    pub fn with_exec<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_exec_opts(args, ExecOptions::default())
    }

    pub fn with_exec_opts<I, S>(&self, args: I, options: ExecOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.derive(|s| s.execs.push(Exec { args, options }))
    }

    /// Make `target` reachable from this container under the DNS name `alias`
    pub fn with_service_binding(&self, alias: &str, target: ServiceTarget) -> Result<Self> {
        if !alias_re().is_match(alias) {
            return Err(DindError::InvalidSpec(format!(
                "service alias '{}' is not a valid hostname label",
                alias
            )));
        }
        if self.state.services.contains_key(alias) {
            return Err(DindError::DuplicateAlias(alias.to_string()));
        }
        if target.exposed_ports.is_empty() {
            return Err(DindError::NoExposedPort(alias.to_string()));
        }

        Ok(self.derive(|s| {
            s.services.insert(
                alias.to_string(),
                ServiceBinding {
                    alias: alias.to_string(),
                    target,
                },
            );
        }))
    }

    pub fn image(&self) -> &ImageRef {
        &self.state.image
    }

    /// Pipeline labels joined with ` > `, or `default` when unlabelled
    pub fn pipeline_path(&self) -> String {
        if self.state.pipeline.is_empty() {
            "default".to_string()
        } else {
            self.state.pipeline.join(" > ")
        }
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.state.env
    }

    pub fn exposed_ports(&self) -> &BTreeSet<u16> {
        &self.state.exposed_ports
    }

    pub fn mounts(&self) -> &BTreeMap<String, CacheVolume> {
        &self.state.mounts
    }

    pub fn execs(&self) -> &[Exec] {
        &self.state.execs
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceBinding> {
        self.state.services.values()
    }

    pub fn service(&self, alias: &str) -> Option<&ServiceBinding> {
        self.state.services.get(alias)
    }

    pub fn requires_privilege(&self) -> bool {
        self.state
            .execs
            .iter()
            .any(|exec| exec.options.insecure_root_capabilities)
    }
}
