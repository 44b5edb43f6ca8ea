// Cancellable child-process execution with streamed output
use crate::cancel::CancelToken;
use crate::errors::{DindError, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A command line plus the limits it runs under
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for log lines
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run `spec` to completion, killing it if `cancel` fires or the timeout passes.
///
/// Output is drained on reader threads so a chatty process never blocks on a
/// full pipe; each line is also logged at debug level as it arrives.
pub fn run(spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
    cancel.check()?;
    tracing::debug!(command = %spec.display(), "spawning");

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            DindError::Backend(format!("failed to spawn '{}': {}", spec.program, e))
        })?;

    let stdout = drain(child.stdout.take(), "stdout");
    let stderr = drain(child.stderr.take(), "stderr");

    let start = Instant::now();
    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status.code()),
            Ok(None) => {}
            Err(e) => {
                kill(&mut child);
                break Err(DindError::Backend(format!(
                    "failed to monitor '{}': {}",
                    spec.display(),
                    e
                )));
            }
        }

        if cancel.is_cancelled() {
            kill(&mut child);
            break Err(DindError::Cancelled);
        }

        if let Some(timeout) = spec.timeout {
            if start.elapsed() >= timeout {
                kill(&mut child);
                break Err(DindError::Backend(format!(
                    "'{}' timed out after {}s",
                    spec.display(),
                    timeout.as_secs()
                )));
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    // On failure the readers are left to finish on their own: a grandchild
    // holding the pipes open must not stall cancellation.
    let exit_code = outcome?;

    Ok(CommandOutput {
        exit_code,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn kill(child: &mut Child) {
    // The process may already be gone; reaping is what matters.
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R>(pipe: Option<R>, stream: &'static str) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    let pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut buf = String::new();
        for line in BufReader::new(pipe).lines() {
            let Ok(line) = line else { break };
            tracing::debug!(stream, "{}", line);
            buf.push_str(&line);
            buf.push('\n');
        }
        buf
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
