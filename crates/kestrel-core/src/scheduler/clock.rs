//! Time sources

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Source of the current time for budgeting and timed wakeups
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block until `deadline` has passed
    fn sleep_until(&self, deadline: Instant) {
        let wait = deadline.saturating_duration_since(self.now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// `sleep_until` jumps straight to the deadline, so timed wakeups resolve
/// without real waiting.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn sleep_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.base);
        let mut offset = self.offset.lock();
        if target > *offset {
            *offset = target;
        }
    }
}
