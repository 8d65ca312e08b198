//! Supervised reconnect policy
//!
//! Exponential backoff capped at a maximum delay. After too many
//! consecutive failures the circuit opens and the policy holds at a long
//! cool-down until a success resets it.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_failures: u32,
    cooldown: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_failures: u32, cooldown: Duration) -> Self {
        Self { initial, max, max_failures, cooldown, current: initial, failures: 0 }
    }

    /// Record a failure and return the delay to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_failures {
            return self.cooldown;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Record a success, closing the circuit.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    /// True once the failure budget is exhausted.
    pub fn is_open(&self) -> bool {
        self.failures > self.max_failures
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(250),
            Duration::from_secs(5),
            10,
            Duration::from_secs(30),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_delays_double_up_to_cap() {
        let mut b = Backoff::new(millis(100), millis(400), 10, millis(5000));
        assert_eq!(b.next_delay(), millis(100));
        assert_eq!(b.next_delay(), millis(200));
        assert_eq!(b.next_delay(), millis(400));
        assert_eq!(b.next_delay(), millis(400), "held at cap");
    }

    #[test]
    fn test_circuit_opens_after_max_failures() {
        let mut b = Backoff::new(millis(100), millis(400), 2, millis(5000));
        b.next_delay();
        b.next_delay();
        assert!(!b.is_open());
        assert_eq!(b.next_delay(), millis(5000));
        assert!(b.is_open());
        assert_eq!(b.next_delay(), millis(5000), "stays open");
    }

    #[test]
    fn test_reset_closes_circuit() {
        let mut b = Backoff::new(millis(100), millis(400), 1, millis(5000));
        b.next_delay();
        b.next_delay();
        assert!(b.is_open());

        b.reset();
        assert!(!b.is_open());
        assert_eq!(b.failures(), 0);
        assert_eq!(b.next_delay(), millis(100));
    }
}
