//! Backoff timing for requeued reconciliations.
use std::collections::HashMap;
use std::time::Duration;

use crate::event::ObjectKey;

/// A backoff in which the durations double until hitting a cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffStrategy {
    base_duration: Duration,
    cap: Duration,
    last_duration: Duration,
}

impl ExponentialBackoffStrategy {
    /// Create a strategy starting at `base_duration` and never exceeding `cap`.
    pub fn new(base_duration: Duration, cap: Duration) -> Self {
        Self {
            base_duration,
            cap,
            last_duration: Duration::from_secs(0),
        }
    }

    fn capped_next_duration(&self) -> Duration {
        let next_duration = if self.last_duration == Duration::from_secs(0) {
            self.base_duration
        } else {
            self.last_duration.checked_mul(2).unwrap_or(self.cap)
        };

        if next_duration > self.cap {
            self.cap
        } else {
            next_duration
        }
    }

    /// Resets the strategy after a success.
    pub fn reset(&mut self) {
        self.last_duration = Duration::from_secs(0);
    }

    /// Gets how long to wait before retrying.
    pub fn next_duration(&mut self) -> Duration {
        let next_duration = self.capped_next_duration();
        self.last_duration = next_duration;
        next_duration
    }
}

/// Per-object exponential backoff bounded by a minimum and maximum delay.
///
/// Each key backs off independently. There is no limit on the number of
/// retries, only on the delay between them.
#[derive(Debug)]
pub struct RetryPolicy {
    min: Duration,
    max: Duration,
    items: HashMap<ObjectKey, ExponentialBackoffStrategy>,
}

impl RetryPolicy {
    /// Create a policy whose delays start at `min` and are capped at `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        RetryPolicy {
            min,
            max,
            items: HashMap::new(),
        }
    }

    /// Policy used while waiting for the DBaaSProvider API: 30s up to 30m.
    pub fn type_unavailable() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(30 * 60))
    }

    /// Policy used after faults: 5ms up to 1000s.
    pub fn faults() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }

    /// Delay before the next retry of `key`. Every call counts as a failure.
    pub fn when(&mut self, key: &ObjectKey) -> Duration {
        let (min, max) = (self.min, self.max);
        self.items
            .entry(key.clone())
            .or_insert_with(|| ExponentialBackoffStrategy::new(min, max))
            .next_duration()
    }

    /// Clears the history of `key` after a success.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.items.remove(key);
    }

    /// Whether `key` currently has a failure history.
    pub fn is_backing_off(&self, key: &ObjectKey) -> bool {
        self.items.contains_key(key)
    }
}
