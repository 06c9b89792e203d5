//! crates/wireq-request/src/retry.rs
//!
//! Retry policy collaborator: exposes the current timeout, backoff
//! multiplier, and remaining attempt count, and is mutated by the
//! transport on retryable failures.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Mutable retry state shared between a request and its transport.
#[derive(Debug)]
pub struct RetryPolicy {
    timeout_ms: AtomicU64,
    backoff_multiplier: f32,
    remaining_attempts: AtomicU32,
}

impl RetryPolicy {
    /// Creates a policy with the given initial timeout, backoff multiplier,
    /// and attempt budget.
    #[must_use]
    pub fn new(initial_timeout_ms: u64, backoff_multiplier: f32, max_attempts: u32) -> Self {
        Self {
            timeout_ms: AtomicU64::new(initial_timeout_ms),
            backoff_multiplier,
            remaining_attempts: AtomicU32::new(max_attempts),
        }
    }

    /// Current timeout in milliseconds for the next attempt.
    #[must_use]
    pub fn current_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    /// Multiplier applied to the timeout after each retryable failure.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    /// Attempts remaining, not counting the one currently in flight.
    #[must_use]
    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts.load(Ordering::Acquire)
    }

    /// Called by the transport after a retryable failure: grows the
    /// timeout by the backoff multiplier and consumes one attempt. Returns
    /// `true` if another attempt remains.
    pub fn record_retry(&self) -> bool {
        let remaining = self.remaining_attempts.load(Ordering::Acquire);
        if remaining == 0 {
            return false;
        }
        self.remaining_attempts.store(remaining - 1, Ordering::Release);
        let current = self.timeout_ms.load(Ordering::Acquire);
        let next = (current as f64 * f64::from(self.backoff_multiplier)) as u64;
        self.timeout_ms.store(next.max(current), Ordering::Release);
        remaining > 1
    }
}

impl Default for RetryPolicy {
    /// 2.5s initial timeout, 1.0x backoff, single attempt — matches a
    /// request that does not want transport-level retries.
    fn default() -> Self {
        Self::new(2_500, 1.0, 1)
    }
}
