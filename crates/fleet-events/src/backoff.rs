//! # Per-item exponential backoff
//!
//! Rate limiter deciding how long an item waits before it is re-delivered.
//! Each item has its own failure counter; the delay doubles with every
//! failure and is capped at a maximum.
//!
//! Sequence with the default limiter (10ms base, 50ms max): 10ms, 20ms, 40ms, 50ms, 50ms, ...

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default delay of the first re-delivery.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);

/// Default cap on the re-delivery delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(50);

/// Exponential per-item failure rate limiter
///
/// `when(item)` returns `base * 2^failures(item)` capped at `max`, then
/// counts one more failure for the item. `forget(item)` resets the counter.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> Default for ItemExponentialFailureRateLimiter<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl<K: Eq + Hash + Clone> ItemExponentialFailureRateLimiter<K> {
    /// Create a limiter with the given first delay and cap
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next delivery of `item`; records one more failure
    pub fn when(&self, item: &K) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(item.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);
        Self::delay_for(self.base, self.max, exponent)
    }

    /// Number of failures recorded for `item`
    pub fn num_requeues(&self, item: &K) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.get(item).copied().unwrap_or(0)
    }

    /// Stop tracking `item`; its next delay starts from `base` again
    pub fn forget(&self, item: &K) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.remove(item);
    }

    /// Stateless delay for a given failure count
    ///
    /// # Arguments
    ///
    /// * `failures` - Number of failures already recorded (0-indexed)
    /// * `base` - Delay for the first failure
    /// * `max` - Cap on the delay
    #[must_use]
    pub fn delay_for(base: Duration, max: Duration, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| base.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }
}
