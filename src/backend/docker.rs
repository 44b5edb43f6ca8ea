// Docker CLI backend: every primitive is one `docker` invocation
use crate::backend::command::{self, CommandOutput, CommandSpec};
use crate::backend::{Backend, ExecOutput};
use crate::cancel::CancelToken;
use crate::config::BackendConfig;
use crate::container::{ContainerId, ContainerSpec, Exec, ImageRef};
use crate::errors::{DindError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Label put on every container this backend creates
pub const SESSION_LABEL: &str = "dindrun.session";

/// Drives the host's docker daemon through its CLI.
///
/// Each backend instance owns a private bridge network named after the
/// session; services and consumers are attached to it, and aliases are
/// resolved per consumer with `--add-host`.
pub struct DockerCli {
    program: String,
    allow_privileged: bool,
    command_timeout: Duration,
    session: String,
    owned: Mutex<Vec<ContainerId>>,
    counter: AtomicUsize,
}

/// Subset of `docker inspect` output needed to resolve a service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: HashMap<String, InspectNetwork>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Where a service container can be reached on the session network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub running: bool,
    pub address: Option<String>,
}

impl DockerCli {
    /// Verify the docker daemon answers and create the session network
    pub fn connect(config: &BackendConfig, cancel: &CancelToken) -> Result<Self> {
        let session = format!(
            "dindrun-{}-{}",
            std::process::id(),
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let backend = Self::new(config, &session);

        let version = backend
            .docker(args(["version", "--format", "{{.Server.Version}}"]), cancel)
            .map_err(|e| match e {
                DindError::Cancelled => DindError::Cancelled,
                other => DindError::Connection(other.to_string()),
            })?;
        if !version.success() {
            return Err(DindError::Connection(format!(
                "docker daemon is not reachable: {}",
                version.stderr.trim()
            )));
        }
        tracing::info!(
            server_version = version.stdout.trim(),
            session = %backend.session,
            "connected to docker"
        );

        let network = backend.docker(
            args(["network", "create", "--driver", "bridge", backend.session.as_str()]),
            cancel,
        )?;
        if !network.success() {
            return Err(DindError::Connection(format!(
                "failed to create network '{}': {}",
                backend.session,
                network.stderr.trim()
            )));
        }

        Ok(backend)
    }

    /// Build a backend without touching the daemon
    pub fn new(config: &BackendConfig, session: &str) -> Self {
        Self {
            program: config.program.clone(),
            allow_privileged: config.allow_privileged,
            command_timeout: config.command_timeout(),
            session: session.to_string(),
            owned: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn docker(&self, args: Vec<String>, cancel: &CancelToken) -> Result<CommandOutput> {
        let spec = CommandSpec::new(&self.program, args).timeout(self.command_timeout);
        command::run(&spec, cancel)
    }

    /// Like `docker`, but a non-zero exit becomes a `Backend` error
    fn docker_ok(&self, args: Vec<String>, cancel: &CancelToken) -> Result<CommandOutput> {
        let what = args.first().cloned().unwrap_or_default();
        let output = self.docker(args, cancel)?;
        if !output.success() {
            return Err(DindError::Backend(format!(
                "docker {} failed: {}",
                what,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.session, n)
    }

    fn track(&self, id: &ContainerId) {
        if let Ok(mut owned) = self.owned.lock() {
            owned.push(id.clone());
        }
    }

    fn untrack(&self, id: &ContainerId) {
        if let Ok(mut owned) = self.owned.lock() {
            owned.retain(|c| c != id);
        }
    }

    fn check_privilege(&self, requested: bool) -> Result<()> {
        if requested && !self.allow_privileged {
            return Err(DindError::InsufficientPrivilege(
                "elevated capabilities requested but backend.allow_privileged is false"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Flags shared by service and consumer containers
    fn common_run_args(&self, spec: &ContainerSpec, name: &str) -> Vec<String> {
        let mut run = args(["run", "-d", "--name", name, "--network", self.session.as_str()]);
        run.push("--label".to_string());
        run.push(format!("{}={}", SESSION_LABEL, self.session));

        for (key, value) in spec.env() {
            run.push("-e".to_string());
            run.push(format!("{}={}", key, value));
        }
        for (path, cache) in spec.mounts() {
            run.push("-v".to_string());
            run.push(format!("{}:{}", cache.storage_id(), path));
        }
        run
    }

    /// `docker run` arguments for a detached service container
    pub fn service_run_args(&self, spec: &ContainerSpec, name: &str) -> Result<Vec<String>> {
        if spec.execs().len() > 1 {
            return Err(DindError::InvalidSpec(format!(
                "a service takes at most one start command, got {}",
                spec.execs().len()
            )));
        }

        let mut run = self.common_run_args(spec, name);
        for port in spec.exposed_ports() {
            run.push("--expose".to_string());
            run.push(port.to_string());
        }
        if spec.requires_privilege() {
            run.push("--privileged".to_string());
        }
        run.push(spec.image().to_string());
        if let Some(exec) = spec.execs().first() {
            run.extend(exec.args.iter().cloned());
        }
        Ok(run)
    }

    /// `docker run` arguments for an idle consumer; `hosts` maps alias to address
    pub fn consumer_run_args(
        &self,
        spec: &ContainerSpec,
        name: &str,
        hosts: &[(String, String)],
    ) -> Vec<String> {
        let mut run = self.common_run_args(spec, name);
        for (alias, address) in hosts {
            run.push("--add-host".to_string());
            run.push(format!("{}:{}", alias, address));
        }
        run.extend(args(["--entrypoint", "tail"]));
        run.push(spec.image().to_string());
        run.extend(args(["-f", "/dev/null"]));
        run
    }

    pub fn exec_args(container: &ContainerId, exec: &Exec) -> Vec<String> {
        let mut run = vec!["exec".to_string()];
        if exec.options.insecure_root_capabilities {
            run.push("--privileged".to_string());
        }
        run.push(container.to_string());
        run.extend(exec.args.iter().cloned());
        run
    }

    /// Parse `docker inspect` output for a container on `network`
    pub fn parse_inspect(json: &str, network: &str) -> Result<ServiceState> {
        let entries: Vec<InspectEntry> = serde_json::from_str(json)
            .map_err(|e| DindError::Backend(format!("unexpected docker inspect output: {}", e)))?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DindError::Backend("docker inspect returned nothing".to_string()))?;

        let address = entry
            .network_settings
            .networks
            .get(network)
            .map(|n| n.ip_address.clone())
            .filter(|ip| !ip.is_empty());

        Ok(ServiceState {
            running: entry.state.running,
            address,
        })
    }

    fn inspect(&self, container: &ContainerId, cancel: &CancelToken) -> Result<ServiceState> {
        let output = self.docker_ok(args(["inspect", container.as_str()]), cancel)?;
        Self::parse_inspect(&output.stdout, &self.session)
    }

    /// Start a container and remember it for teardown
    fn run_container(&self, run: Vec<String>, cancel: &CancelToken) -> Result<ContainerId> {
        let output = self.docker(run, cancel)?;
        if !output.success() {
            return Err(classify_run_failure(&output));
        }
        let id = ContainerId::new(output.stdout.trim());
        self.track(&id);
        Ok(id)
    }
}

impl Backend for DockerCli {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    fn ensure_image(&self, image: &ImageRef, cancel: &CancelToken) -> Result<()> {
        let present = self.docker(
            args(["image", "inspect", "--format", "{{.Id}}", image.as_str()]),
            cancel,
        )?;
        if present.success() {
            return Ok(());
        }

        tracing::info!(image = %image, "pulling image");
        let pull = self.docker(args(["pull", image.as_str()]), cancel)?;
        if !pull.success() {
            return Err(DindError::Resolution {
                reference: image.to_string(),
                reason: pull.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn start_service(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<ContainerId> {
        self.check_privilege(spec.requires_privilege())?;
        let name = self.next_name();
        let run = self.service_run_args(spec, &name)?;
        let id = self.run_container(run, cancel)?;
        tracing::debug!(container = %id, %name, "service container started");
        Ok(id)
    }

    fn create_consumer(
        &self,
        spec: &ContainerSpec,
        cancel: &CancelToken,
    ) -> Result<ContainerId> {
        self.check_privilege(spec.requires_privilege())?;

        let mut hosts = Vec::new();
        for binding in spec.services() {
            let state = self.inspect(&binding.target.container, cancel)?;
            if !state.running {
                return Err(DindError::ServiceNotRunning(binding.alias.clone()));
            }
            let address = state.address.ok_or_else(|| {
                DindError::Backend(format!(
                    "service '{}' has no address on network '{}'",
                    binding.alias, self.session
                ))
            })?;
            hosts.push((binding.alias.clone(), address));
        }

        let name = self.next_name();
        let run = self.consumer_run_args(spec, &name, &hosts);
        self.run_container(run, cancel)
    }

    fn exec(
        &self,
        container: &ContainerId,
        exec: &Exec,
        cancel: &CancelToken,
    ) -> Result<ExecOutput> {
        self.check_privilege(exec.options.insecure_root_capabilities)?;
        let output = self.docker(Self::exec_args(container, exec), cancel)?;
        exec_output(exec, output)
    }

    fn wait(&self, container: &ContainerId, cancel: &CancelToken) -> Result<i32> {
        // `docker wait` blocks for as long as the container lives.
        let spec = CommandSpec::new(&self.program, args(["wait", container.as_str()]));
        let output = command::run(&spec, cancel)?;
        if !output.success() {
            return Err(DindError::Backend(format!(
                "docker wait failed: {}",
                output.stderr.trim()
            )));
        }
        output.stdout.trim().parse::<i32>().map_err(|e| {
            DindError::Backend(format!(
                "unexpected docker wait output '{}': {}",
                output.stdout.trim(),
                e
            ))
        })
    }

    fn logs(&self, container: &ContainerId) -> Result<String> {
        let output = self.docker_ok(args(["logs", container.as_str()]), &CancelToken::new())?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    fn commit(
        &self,
        container: &ContainerId,
        reference: &ImageRef,
        cancel: &CancelToken,
    ) -> Result<()> {
        // Consumers run with `tail` as entrypoint; restore the image's own
        // entrypoint and command so the committed image starts normally.
        let image = self.docker_ok(
            args(["inspect", "--format", "{{.Config.Image}}", container.as_str()]),
            cancel,
        )?;
        let config = self.docker_ok(
            args(["image", "inspect", "--format", "{{json .Config}}", image.stdout.trim()]),
            cancel,
        )?;

        let mut commit = vec!["commit".to_string()];
        for change in commit_changes(&config.stdout)? {
            commit.push("--change".to_string());
            commit.push(change);
        }
        commit.push(container.to_string());
        commit.push(reference.to_string());
        self.docker_ok(commit, cancel)?;
        Ok(())
    }

    fn push(&self, reference: &ImageRef, cancel: &CancelToken) -> Result<String> {
        let output = self.docker_ok(args(["push", reference.as_str()]), cancel)?;
        Ok(match parse_push_digest(&output.stdout) {
            Some(digest) => format!("{}@{}", reference, digest),
            None => reference.to_string(),
        })
    }

    fn remove(&self, container: &ContainerId) -> Result<()> {
        // Teardown must work after the run was cancelled, so use a fresh token.
        self.docker_ok(
            args(["rm", "-f", "-v", container.as_str()]),
            &CancelToken::new(),
        )?;
        self.untrack(container);
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        let owned: Vec<ContainerId> = self
            .owned
            .lock()
            .map(|owned| owned.clone())
            .unwrap_or_default();

        let mut failures = Vec::new();
        for id in owned.iter().rev() {
            if let Err(e) = self.remove(id) {
                tracing::warn!(container = %id, error = %e, "failed to remove container");
                failures.push(id.to_string());
            }
        }

        if let Err(e) = self.docker_ok(
            args(["network", "rm", self.session.as_str()]),
            &CancelToken::new(),
        ) {
            tracing::warn!(network = %self.session, error = %e, "failed to remove network");
            failures.push(self.session.clone());
        }

        if !failures.is_empty() {
            return Err(DindError::Backend(format!(
                "teardown left behind: {}",
                failures.join(", ")
            )));
        }
        tracing::debug!(session = %self.session, "session torn down");
        Ok(())
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn is_privilege_denied(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("privileged")
        && (stderr.contains("not allowed")
            || stderr.contains("denied")
            || stderr.contains("not permitted"))
}

/// Only a privileged exec can be refused for privilege; anything else is the command's own stderr
fn exec_output(exec: &Exec, output: CommandOutput) -> Result<ExecOutput> {
    if exec.options.insecure_root_capabilities
        && !output.success()
        && is_privilege_denied(&output.stderr)
    {
        return Err(DindError::InsufficientPrivilege(
            output.stderr.trim().to_string(),
        ));
    }
    Ok(ExecOutput {
        exit_code: output.exit_code.unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

fn classify_run_failure(output: &CommandOutput) -> DindError {
    let stderr = output.stderr.trim();
    if is_privilege_denied(stderr) {
        DindError::InsufficientPrivilege(stderr.to_string())
    } else {
        DindError::Backend(format!("docker run failed: {}", stderr))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageConfig {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

/// `--change` instructions that reset entrypoint and command to the image's config JSON
fn commit_changes(config_json: &str) -> Result<Vec<String>> {
    let config: ImageConfig = serde_json::from_str(config_json.trim())
        .map_err(|e| DindError::Backend(format!("unexpected image config: {}", e)))?;
    let json = |value: Option<Vec<String>>| {
        serde_json::to_string(&value.unwrap_or_default())
            .map_err(|e| DindError::Backend(e.to_string()))
    };
    Ok(vec![
        format!("ENTRYPOINT {}", json(config.entrypoint)?),
        format!("CMD {}", json(config.cmd)?),
    ])
}

/// Extract `sha256:...` from `docker push` output (`latest: digest: sha256:... size: 528`)
fn parse_push_digest(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}
