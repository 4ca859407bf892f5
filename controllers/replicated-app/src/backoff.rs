//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for retrying failed reconcile passes.
//! The sequence grows more slowly than exponential backoff, so a flapping
//! driver is retried often at first without being hammered later.
//!
//! Sequence with the defaults: 1s, 1s, 2s, 3s, 5s, 8s, ... capped at 60s.
//! There is no retry ceiling: once the cap is reached every retry waits the
//! maximum delay.

use crds::ResourceIdentity;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff in milliseconds (for reset)
    min_ms: u64,
    /// Previous backoff in milliseconds
    prev_ms: u64,
    /// Current backoff in milliseconds
    current_ms: u64,
    /// Maximum backoff in milliseconds
    max_ms: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff
    ///
    /// # Arguments
    ///
    /// * `min` - First (and second) delay
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = millis(min);
        Self {
            min_ms,
            prev_ms: 0,
            current_ms: min_ms,
            max_ms: millis(max).max(min_ms),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;

        let next = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next, self.max_ms);

        Duration::from_millis(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_ms = 0;
        self.current_ms = self.min_ms;
    }

    /// Calculate the backoff for a given consecutive error count (stateless)
    ///
    /// The sequence starts at `min` for error_count 0 and 1, then follows
    /// min, min, 2min, 3min, 5min, 8min, ... capped at `max`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min: Duration, max: Duration) -> Duration {
        let mut backoff = Self::new(min, max);
        let mut delay = backoff.next_backoff();
        for _ in 0..error_count {
            delay = backoff.next_backoff();
            if delay >= max {
                break;
            }
        }
        delay
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-identity retry delays.
///
/// The lock is only held for the map update, never across an `.await`.
#[derive(Debug)]
pub struct BackoffRegistry {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<ResourceIdentity, BackoffState>>,
}

impl BackoffRegistry {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ResourceIdentity, BackoffState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure and return `(delay, consecutive_errors)`
    pub fn next_delay(&self, identity: &ResourceIdentity) -> (Duration, u32) {
        let mut states = self.states();
        let state = states.entry(identity.clone()).or_insert_with(|| BackoffState {
            backoff: FibonacciBackoff::new(self.min, self.max),
            error_count: 0,
        });
        state.error_count = state.error_count.saturating_add(1);
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Reset after a successful pass
    pub fn reset(&self, identity: &ResourceIdentity) {
        if let Some(state) = self.states().get_mut(identity) {
            state.error_count = 0;
            state.backoff.reset();
        }
    }

    /// Drop all state for a deleted resource
    pub fn forget(&self, identity: &ResourceIdentity) {
        self.states().remove(identity);
    }

    pub fn error_count(&self, identity: &ResourceIdentity) -> u32 {
        self.states().get(identity).map_or(0, |s| s.error_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(secs(1), secs(10));

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(3));
        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(8));
        assert_eq!(backoff.next_backoff(), secs(10)); // max
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(secs(1), secs(10));
        for _ in 0..7 {
            backoff.next_backoff();
        }
        // Next would be 13s (8+5), capped at 10s
        assert_eq!(backoff.next_backoff(), secs(10));
        assert_eq!(backoff.next_backoff(), secs(10));
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(secs(1), secs(10));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
    }

    #[test]
    fn test_calculate_for_error_count() {
        let (min, max) = (secs(1), secs(10));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(0, min, max), secs(1));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(1, min, max), secs(1));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(2, min, max), secs(2));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(4, min, max), secs(5));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(50, min, max), secs(10));
    }

    #[test]
    fn test_registry_tracks_identities_independently() {
        let registry = BackoffRegistry::new(secs(1), secs(60));
        let a = ResourceIdentity::new("prod", "a");
        let b = ResourceIdentity::new("prod", "b");

        assert_eq!(registry.next_delay(&a), (secs(1), 1));
        assert_eq!(registry.next_delay(&a), (secs(1), 2));
        assert_eq!(registry.next_delay(&a), (secs(2), 3));
        assert_eq!(registry.next_delay(&b), (secs(1), 1));

        registry.reset(&a);
        assert_eq!(registry.error_count(&a), 0);
        assert_eq!(registry.next_delay(&a), (secs(1), 1));

        registry.forget(&b);
        assert_eq!(registry.error_count(&b), 0);
    }
}
