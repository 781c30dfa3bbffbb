//! Adaptive step budget
//!
//! A slice runs at most `steps()` runner steps. After a slice that used its
//! whole budget, the measured wall time decides whether to rescale: slices
//! outside the configured window are resized so the next one lasts about
//! the target duration.

use crate::config::VmOptions;
use std::time::Duration;

/// Steps allowed per slice, adjusted from measured slice durations
#[derive(Debug, Clone)]
pub struct StepBudget {
    steps: u64,
    max_steps: u64,
    window_min: Duration,
    window_max: Duration,
    target: Duration,
}

impl StepBudget {
    /// Budget seeded from `options`
    pub fn new(options: &VmOptions) -> Self {
        Self {
            steps: options.initial_step_budget.max(1),
            max_steps: options.max_step_budget.max(1),
            window_min: options.slice_min(),
            window_max: options.slice_max(),
            target: options.slice_target(),
        }
    }

    /// Current budget
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Feed the duration of a slice that exhausted the budget
    ///
    /// Returns the new budget when it changed.
    pub fn observe(&mut self, elapsed: Duration) -> Option<u64> {
        let next = if elapsed.is_zero() {
            self.steps.saturating_mul(2)
        } else if elapsed < self.window_min || elapsed > self.window_max {
            let nanos_per_step = elapsed.as_nanos() as f64 / self.steps as f64;
            (self.target.as_nanos() as f64 / nanos_per_step) as u64
        } else {
            return None;
        };
        let next = next.clamp(1, self.max_steps);
        if next == self.steps {
            return None;
        }
        self.steps = next;
        Some(next)
    }
}
