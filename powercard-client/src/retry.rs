//! Retry policy for the reversal loop

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter while the host is unreachable
///
/// With no failures the loop runs at `base_interval`. Each consecutive
/// unreachable tick doubles the delay up to `max_backoff`, then a ±20%
/// jitter spreads terminals that lost the host at the same moment.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    base_interval: Duration,
    max_backoff: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_interval: Duration, max_backoff: Duration) -> Self {
        Self {
            base_interval,
            max_backoff: max_backoff.max(base_interval),
            jitter: 0.2,
        }
    }

    /// Set the jitter fraction, clamped to 0.0..=1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay before the next tick after `consecutive_failures` unreachable ticks
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.base_interval;
        }
        let exponent = consecutive_failures.min(16);
        let base = self.base_interval.as_millis() as f64 * 2f64.powi(exponent as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let factor = if self.jitter > 0.0 {
            1.0 + (rand::thread_rng().r#gen::<f64>() - 0.5) * 2.0 * self.jitter
        } else {
            1.0
        };
        Duration::from_millis((capped * factor) as u64).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_uses_base_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(100)).with_jitter(0.0);
        assert_eq!(policy.delay_for(1), Duration::from_secs(20));
        assert_eq!(policy.delay_for(2), Duration::from_secs(40));
        assert_eq!(policy.delay_for(3), Duration::from_secs(80));
        assert_eq!(policy.delay_for(4), Duration::from_secs(100));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(1000));
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(16), "{:?}", delay);
            assert!(delay <= Duration::from_secs(24), "{:?}", delay);
        }
    }

    #[test]
    fn test_max_backoff_never_below_base() {
        let policy = RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(policy.max_backoff(), Duration::from_secs(60));
    }
}
