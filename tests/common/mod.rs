// Common test utilities for dindrun integration tests
#![allow(dead_code)]

use dindrun::backend::{Backend, ExecOutput};
use dindrun::cancel::CancelToken;
use dindrun::clock::Clock;
use dindrun::container::{ContainerId, ContainerSpec, Exec, ImageRef};
use dindrun::errors::{DindError, Result};
use dindrun::session::Session;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Knobs for the in-memory backend
#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Refuse privileged containers, as a rootless engine would
    pub deny_privileged: bool,
    /// References `ensure_image` fails to pull
    pub missing_images: Vec<String>,
    /// Number of `docker` commands a daemon refuses before it accepts connections
    pub refuse_connections: u32,
    /// Services exit with this code as soon as they start
    pub service_exit_code: Option<i32>,
    /// Images the nested daemon fails to pull
    pub unpullable: Vec<String>,
}

#[derive(Debug, Default)]
struct NestedDaemon {
    images: BTreeSet<String>,
    published: BTreeMap<u16, String>,
    containers: u32,
}

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    service: bool,
    removed: bool,
    exit_code: Option<i32>,
    files: BTreeMap<String, String>,
    logs: String,
    daemon: NestedDaemon,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    containers: BTreeMap<ContainerId, FakeContainer>,
    /// Cache volume contents, keyed by storage id, then by path below the mount
    volumes: HashMap<String, BTreeMap<String, String>>,
    pulled: Vec<String>,
    commands: Vec<Vec<String>>,
    refused: u32,
    committed: Vec<(ContainerId, String)>,
    pushed: Vec<String>,
    teardowns: u32,
}

/// In-memory backend interpreting a handful of shell-like commands.
///
/// Consumers understand `echo`, `write <path> <text>`, `read <path>`,
/// `fail [code]`, `docker info|pull|images|run` against a bound daemon and
/// `curl <alias>:<port>`.
pub struct FakeBackend {
    options: FakeOptions,
    state: Mutex<State>,
    changed: Condvar,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_options(FakeOptions::default())
    }

    pub fn with_options(options: FakeOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }

    /// Every consumer command run so far, in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.state.lock().unwrap().pulled.clone()
    }

    pub fn committed(&self) -> Vec<(ContainerId, String)> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn teardowns(&self) -> u32 {
        self.state.lock().unwrap().teardowns
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> Vec<ContainerId> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|(_, c)| !c.removed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Spec a container was created from
    pub fn spec_of(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.spec.clone())
    }

    /// Make a running container exit with `code`
    pub fn exit(&self, id: &ContainerId, code: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.get_mut(id) {
            container.exit_code.get_or_insert(code);
        }
        self.changed.notify_all();
    }

    fn create(&self, spec: &ContainerSpec, service: bool) -> Result<ContainerId> {
        if spec.requires_privilege() && self.options.deny_privileged {
            return Err(DindError::InsufficientPrivilege(format!(
                "{} needs a privileged container",
                spec.pipeline_path()
            )));
        }

        let mut state = self.state.lock().unwrap();
        for binding in spec.services() {
            let running = state
                .containers
                .get(&binding.target.container)
                .is_some_and(|c| !c.removed && c.exit_code.is_none());
            if !running {
                return Err(DindError::ServiceNotRunning(binding.alias.clone()));
            }
        }

        state.next_id += 1;
        let id = ContainerId::new(format!("fake-{}", state.next_id));
        let exit_code = if service {
            self.options.service_exit_code
        } else {
            None
        };
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                service,
                removed: false,
                exit_code,
                files: BTreeMap::new(),
                logs: String::new(),
                daemon: NestedDaemon::default(),
            },
        );
        self.changed.notify_all();
        Ok(id)
    }

    fn refuse(&self, state: &mut State) -> bool {
        if state.refused < self.options.refuse_connections {
            state.refused += 1;
            true
        } else {
            false
        }
    }
}

fn ok(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failed(exit_code: i32, stderr: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

/// Volume and relative path a container path lands in, if it is under a cache mount
fn cache_location(spec: &ContainerSpec, path: &str) -> Option<(String, String)> {
    spec.mounts().iter().find_map(|(mount, cache)| {
        let mount = mount.trim_end_matches('/');
        let rest = path.strip_prefix(mount)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some((cache.storage_id(), rest.trim_start_matches('/').to_string()))
        } else {
            None
        }
    })
}

/// Service container bound under the host part of `endpoint` (`tcp://alias:port` or `alias:port`)
fn bound_service(spec: &ContainerSpec, endpoint: &str) -> Option<(ContainerId, u16)> {
    let address = endpoint.split("://").last()?;
    let (alias, port) = address.split_once(':')?;
    let port: u16 = port.trim_end_matches('/').parse().ok()?;
    let binding = spec.service(alias)?;
    Some((binding.target.container.clone(), port))
}

impl FakeBackend {
    fn interpret(&self, state: &mut State, id: &ContainerId, args: &[String]) -> ExecOutput {
        let spec = state.containers[id].spec.clone();
        let rest = &args[1..];

        match args[0].as_str() {
            "echo" => ok(format!("{}\n", rest.join(" "))),
            "fail" => {
                let code = rest.first().and_then(|c| c.parse().ok()).unwrap_or(1);
                failed(code, "failed on purpose")
            }
            "write" if rest.len() == 2 => {
                let (path, text) = (&rest[0], &rest[1]);
                match cache_location(&spec, path) {
                    Some((volume, key)) => {
                        state.volumes.entry(volume).or_default().insert(key, text.clone());
                    }
                    None => {
                        if let Some(container) = state.containers.get_mut(id) {
                            container.files.insert(path.clone(), text.clone());
                        }
                    }
                }
                ok("")
            }
            "read" if rest.len() == 1 => {
                let path = &rest[0];
                let content = match cache_location(&spec, path) {
                    Some((volume, key)) => state.volumes.get(&volume).and_then(|v| v.get(&key)),
                    None => state.containers[id].files.get(path),
                };
                match content {
                    Some(text) => ok(text.clone()),
                    None => failed(1, format!("read: {}: No such file or directory", path)),
                }
            }
            "docker" => self.docker(state, &spec, rest),
            "curl" if rest.len() == 1 => {
                let reached = bound_service(&spec, &rest[0]).and_then(|(daemon, port)| {
                    let daemon = state.containers.get(&daemon)?;
                    daemon.daemon.published.get(&port).cloned()
                });
                match reached {
                    Some(image) => ok(format!("Hello World from {}\n", image)),
                    None => failed(7, format!("curl: (7) Failed to connect to {}", rest[0])),
                }
            }
            other => failed(127, format!("{}: command not found", other)),
        }
    }

    fn docker(&self, state: &mut State, spec: &ContainerSpec, rest: &[String]) -> ExecOutput {
        let host = spec.env().get("DOCKER_HOST").cloned().unwrap_or_default();
        let cannot_connect = failed(
            1,
            format!("Cannot connect to the Docker daemon at {}. Is the docker daemon running?", host),
        );

        let Some((daemon_id, port)) = bound_service(spec, &host) else {
            return cannot_connect;
        };
        let reachable = state.containers.get(&daemon_id).is_some_and(|d| {
            !d.removed && d.exit_code.is_none() && d.spec.exposed_ports().contains(&port)
        });
        if !reachable || self.refuse(state) {
            return cannot_connect;
        }

        let Some(daemon) = state.containers.get_mut(&daemon_id).map(|c| &mut c.daemon) else {
            return cannot_connect;
        };
        match rest.first().map(String::as_str) {
            Some("info") => ok(format!(
                "Containers: {}\nImages: {}\nServer Version: 24.0.7\n",
                daemon.containers,
                daemon.images.len()
            )),
            Some("pull") if rest.len() == 2 => {
                if self.options.unpullable.contains(&rest[1]) {
                    return failed(
                        1,
                        format!("Error response from daemon: pull access denied for {}", rest[1]),
                    );
                }
                daemon.images.insert(rest[1].clone());
                ok(format!("Status: Downloaded newer image for {}\n", rest[1]))
            }
            Some("images") => {
                let mut listing = "REPOSITORY\n".to_string();
                for image in &daemon.images {
                    listing.push_str(image);
                    listing.push('\n');
                }
                ok(listing)
            }
            Some("run") => {
                let Some(image) = rest.last() else {
                    return failed(125, "docker run requires an image");
                };
                if !daemon.images.contains(image) {
                    return failed(125, format!("Unable to find image '{}' locally", image));
                }
                let mapping = rest
                    .windows(2)
                    .find(|w| w[0] == "-p")
                    .and_then(|w| w[1].split_once(':'))
                    .and_then(|(host, _)| host.parse::<u16>().ok());
                if let Some(host_port) = mapping {
                    if daemon.published.contains_key(&host_port) {
                        return failed(125, "port is already allocated");
                    }
                    daemon.published.insert(host_port, image.clone());
                }
                daemon.containers += 1;
                ok(format!("{:064}\n", daemon.containers))
            }
            _ => failed(1, format!("docker: unsupported command {:?}", rest)),
        }
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn ensure_image(&self, image: &ImageRef, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        if self.options.missing_images.iter().any(|m| m == image.as_str()) {
            return Err(DindError::Resolution {
                reference: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        self.state.lock().unwrap().pulled.push(image.to_string());
        Ok(())
    }

    fn start_service(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<ContainerId> {
        cancel.check()?;
        let id = self.create(spec, true)?;
        let command = spec
            .execs()
            .first()
            .map(|exec| exec.args.join(" "))
            .unwrap_or_default();
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(&id) {
            container.logs.push_str(&format!("starting {}\n", command));
        }
        Ok(id)
    }

    fn create_consumer(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<ContainerId> {
        cancel.check()?;
        self.create(spec, false)
    }

    fn exec(&self, container: &ContainerId, exec: &Exec, cancel: &CancelToken) -> Result<ExecOutput> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        match state.containers.get(container) {
            Some(c) if !c.removed && !c.service => {}
            _ => return Err(DindError::Backend(format!("no such consumer: {}", container))),
        }
        state.commands.push(exec.args.clone());
        Ok(self.interpret(&mut state, container, &exec.args))
    }

    fn wait(&self, container: &ContainerId, cancel: &CancelToken) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.containers.get(container) {
                None => return Err(DindError::Backend(format!("no such container: {}", container))),
                Some(c) => {
                    if let Some(code) = c.exit_code {
                        return Ok(code);
                    }
                }
            }
            cancel.check()?;
            let (next, _) = self
                .changed
                .wait_timeout(state, Duration::from_millis(20))
                .unwrap();
            state = next;
        }
    }

    fn logs(&self, container: &ContainerId) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(container)
            .map(|c| c.logs.clone())
            .ok_or_else(|| DindError::Backend(format!("no such container: {}", container)))
    }

    fn commit(&self, container: &ContainerId, reference: &ImageRef, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.containers.get(container).is_some_and(|c| !c.removed) {
            return Err(DindError::Backend(format!("no such container: {}", container)));
        }
        state.committed.push((container.clone(), reference.to_string()));
        Ok(())
    }

    fn push(&self, reference: &ImageRef, cancel: &CancelToken) -> Result<String> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.committed.iter().any(|(_, r)| r == reference.as_str()) {
            return Err(DindError::Backend(format!(
                "An image does not exist locally with the tag: {}",
                reference
            )));
        }
        state.pushed.push(reference.to_string());
        Ok(format!("{}@sha256:{}", reference, "ab".repeat(32)))
    }

    fn remove(&self, container: &ContainerId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(container) {
            c.removed = true;
            c.exit_code.get_or_insert(137);
        }
        self.changed.notify_all();
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.teardowns += 1;
        for container in state.containers.values_mut() {
            container.removed = true;
            container.exit_code.get_or_insert(137);
        }
        self.changed.notify_all();
        Ok(())
    }
}

/// Clock that jumps forward when slept on, yielding briefly to other threads
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
    slept: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
            slept: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn slept(&self) -> Duration {
        *self.slept.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
        *self.slept.lock().unwrap() += duration;
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A session over a fresh fake backend, keeping a handle to inspect it
pub fn fake_session(options: FakeOptions) -> (Arc<FakeBackend>, Session) {
    let fake = Arc::new(FakeBackend::with_options(options));
    let session = Session::with_backend(fake.clone(), CancelToken::new());
    (fake, session)
}

pub fn args(command: &[&str]) -> Vec<String> {
    command.iter().map(|arg| arg.to_string()).collect()
}
