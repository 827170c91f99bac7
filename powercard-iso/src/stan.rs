//! Systems Trace Audit Number sources

use std::sync::atomic::{AtomicU32, Ordering};

const STAN_MAX: u32 = 999_999;

/// Monotonic STAN counter, wrapping from 999999 back to 000001
#[derive(Debug)]
pub struct StanGenerator {
    last: AtomicU32,
}

impl StanGenerator {
    /// Start a counter whose first value is `last + 1`
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: AtomicU32::new(last % (STAN_MAX + 1)),
        }
    }

    /// Next STAN as six ASCII digits
    pub fn next(&self) -> String {
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v >= STAN_MAX { 1 } else { v + 1 })
            })
            .unwrap_or(0);
        let value = if prev >= STAN_MAX { 1 } else { prev + 1 };
        format!("{:06}", value)
    }

    /// Last value handed out, for persisting across restarts
    pub fn last(&self) -> u32 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for StanGenerator {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

/// STAN derived from the wall clock, used when a reversal carries none
///
/// Two reversals built within the same second collide, and values repeat
/// every ~11.5 days; callers that can supply a real STAN should.
pub fn synthetic_stan() -> String {
    let secs = chrono::Utc::now().timestamp().rem_euclid(1_000_000);
    format!("{:06}", secs)
}
