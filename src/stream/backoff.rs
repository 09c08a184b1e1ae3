//! Reconnect delay policy.

use std::time::Duration;

/// Doubling reconnect delay between a minimum and a cap.
///
/// Each failure returns the delay to wait now and doubles the next one, up
/// to `max`. [`reset`](Self::reset) returns to `min`.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// A `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay the next failure will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure and return how long to wait before reconnecting.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
