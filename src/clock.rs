// Time source for the readiness gate, swappable in tests
use std::time::{Duration, Instant};

/// Abstracts over wall-clock time so backoff loops can be tested without sleeping
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);

    /// Time elapsed since `start` according to this clock
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock that only moves when slept on, recording every sleep
    #[derive(Clone)]
    pub struct FakeClock {
        time: Arc<Mutex<Instant>>,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                time: Arc::new(Mutex::new(Instant::now())),
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn advance(&self, duration: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += duration;
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.time.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }
}
