// Readiness gate: poll a dependent service until it accepts work
use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::config::ReadinessConfig;
use crate::errors::{DindError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Longest uninterrupted sleep, so cancellation is noticed quickly
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Checking { attempt: u32 },
    Ready { attempts: u32 },
    Failed { attempts: u32 },
}

/// Retries a check with exponential backoff until it succeeds or the budget runs out
pub struct ReadinessGate {
    timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: Option<u32>,
    clock: Arc<dyn Clock>,
    state: ReadinessState,
}

impl ReadinessGate {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self::new_with_clock(config, Arc::new(SystemClock))
    }

    pub fn new_with_clock(config: &ReadinessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeout: config.timeout(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            max_attempts: config.max_attempts,
            clock,
            state: ReadinessState::Starting,
        }
    }

    pub fn state(&self) -> &ReadinessState {
        &self.state
    }

    /// Call `check` until it returns `Ok`, returning the number of attempts.
    ///
    /// Only transient errors (see `DindError::is_transient`) are retried; any
    /// other error fails the gate at once. `check` receives the 1-based attempt.
    pub fn wait<F>(&mut self, cancel: &CancelToken, mut check: F) -> Result<u32>
    where
        F: FnMut(u32) -> Result<()>,
    {
        let start = self.clock.now();
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            if let Err(e) = cancel.check() {
                self.state = ReadinessState::Failed { attempts: attempt };
                return Err(e);
            }

            attempt += 1;
            self.state = ReadinessState::Checking { attempt };

            let last_error = match check(attempt) {
                Ok(()) => {
                    self.state = ReadinessState::Ready { attempts: attempt };
                    tracing::info!(attempts = attempt, "service ready");
                    return Ok(attempt);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    self.state = ReadinessState::Failed { attempts: attempt };
                    return Err(e);
                }
            };

            let elapsed = self.clock.elapsed_since(start);
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempt >= max);
            if out_of_attempts || elapsed + backoff > self.timeout {
                self.state = ReadinessState::Failed { attempts: attempt };
                return Err(DindError::NotReady {
                    attempts: attempt,
                    elapsed,
                    last_error: last_error.to_string(),
                });
            }

            tracing::debug!(
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "not ready yet"
            );
            self.sleep(backoff, cancel)?;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }

    fn sleep(&mut self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if let Err(e) = cancel.check() {
                self.state = ReadinessState::Failed {
                    attempts: self.attempts(),
                };
                return Err(e);
            }
            let slice = remaining.min(SLEEP_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
        Ok(())
    }

    fn attempts(&self) -> u32 {
        match self.state {
            ReadinessState::Starting => 0,
            ReadinessState::Checking { attempt } => attempt,
            ReadinessState::Ready { attempts } | ReadinessState::Failed { attempts } => attempts,
        }
    }
}
