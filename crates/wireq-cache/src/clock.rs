//! crates/wireq-cache/src/clock.rs
//!
//! An injectable source of "now", so TTL/soft-TTL/`keep_until` comparisons
//! and pruning don't depend on wall-clock sleeps in tests. See
//! `wireq-test-support::FakeClock` for the deterministic implementation
//! used by this crate's own tests.

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    /// Current time, in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now_ms();
        assert!(second >= first);
    }
}
