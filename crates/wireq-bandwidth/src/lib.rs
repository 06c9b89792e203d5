//! # Overview
//!
//! `wireq-bandwidth` is the optional telemetry collaborator mentioned in the
//! data model: a fixed-capacity ring of recent `(bytes, elapsed)` network
//! transfer samples that derives a hysteretic low/high-bandwidth flag.
//! Nothing in the dispatch fabric depends on it for correctness — it exists
//! so a caller can, for example, skip prefetching large bodies while the
//! flag reads "low".
//!
//! # Design
//!
//! Samples are pushed into a `VecDeque` capped at a fixed capacity; the
//! oldest sample is dropped once the ring is full. The current estimate is
//! `sum(bytes) / sum(elapsed)`. The flag itself uses two distinct
//! thresholds so it does not flap at the boundary: once flagged low, the
//! estimate must climb past `high_threshold_bps` before the flag clears;
//! once normal, it must fall below `low_threshold_bps` before the flag
//! sets. This mirrors the hysteresis factor used by the cache engine's
//! pruning passes — a single threshold would otherwise oscillate the flag
//! on every sample near the boundary.

#![deny(unsafe_code)]

use std::collections::VecDeque;
use std::time::Duration;

/// One observed transfer: byte count and the wall-clock time it took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Bytes transferred.
    pub bytes: u64,
    /// Time taken, in milliseconds.
    pub elapsed_ms: u64,
}

/// A fixed-capacity ring of recent transfer samples with a hysteretic
/// low/high bandwidth flag.
#[derive(Debug)]
pub struct BandwidthRing {
    capacity: usize,
    samples: VecDeque<Sample>,
    low_threshold_bps: f64,
    high_threshold_bps: f64,
    is_low: bool,
}

impl BandwidthRing {
    /// Creates a ring holding at most `capacity` samples. `low_threshold_bps`
    /// is the estimate below which the flag sets; `high_threshold_bps` (which
    /// must be `>= low_threshold_bps`) is the estimate above which it clears.
    #[must_use]
    pub fn new(capacity: usize, low_threshold_bps: f64, high_threshold_bps: f64) -> Self {
        assert!(capacity > 0, "bandwidth ring capacity must be non-zero");
        assert!(
            high_threshold_bps >= low_threshold_bps,
            "high threshold must not be below low threshold"
        );
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            low_threshold_bps,
            high_threshold_bps,
            is_low: false,
        }
    }

    /// Records a completed transfer of `bytes` over `elapsed`, evicting the
    /// oldest sample if the ring is already at capacity, then re-evaluates
    /// the hysteretic flag.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { bytes, elapsed_ms });
        self.update_flag();
    }

    fn update_flag(&mut self) {
        let Some(estimate) = self.current_bps() else {
            return;
        };
        if self.is_low {
            if estimate > self.high_threshold_bps {
                self.is_low = false;
            }
        } else if estimate < self.low_threshold_bps {
            self.is_low = true;
        }
    }

    /// Returns the current bytes-per-second estimate over all retained
    /// samples, or `None` if no samples have been recorded yet.
    #[must_use]
    pub fn current_bps(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total_bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let total_ms: u64 = self.samples.iter().map(|s| s.elapsed_ms).sum();
        if total_ms == 0 {
            return None;
        }
        Some(total_bytes as f64 / (total_ms as f64 / 1000.0))
    }

    /// Returns `true` if the network is currently considered low-bandwidth.
    #[must_use]
    pub fn is_low_bandwidth(&self) -> bool {
        self.is_low
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_has_no_estimate() {
        let ring = BandwidthRing::new(4, 1000.0, 2000.0);
        assert_eq!(ring.current_bps(), None);
        assert!(!ring.is_low_bandwidth());
    }

    #[test]
    fn evicts_oldest_sample_past_capacity() {
        let mut ring = BandwidthRing::new(2, 1.0, 2.0);
        ring.record(100, Duration::from_millis(1000));
        ring.record(200, Duration::from_millis(1000));
        ring.record(300, Duration::from_millis(1000));
        assert_eq!(ring.len(), 2);
        // oldest sample (100 bytes) should have been evicted
        assert!((ring.current_bps().unwrap() - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hysteresis_prevents_flapping_at_boundary() {
        let mut ring = BandwidthRing::new(1, 1000.0, 2000.0);
        // Drop below low threshold: flag sets.
        ring.record(500, Duration::from_secs(1));
        assert!(ring.is_low_bandwidth());
        // Rise to a value between the two thresholds: flag must stay set.
        ring.record(1500, Duration::from_secs(1));
        assert!(ring.is_low_bandwidth());
        // Rise past the high threshold: flag clears.
        ring.record(3000, Duration::from_secs(1));
        assert!(!ring.is_low_bandwidth());
        // Drop back between thresholds: flag must stay clear.
        ring.record(1500, Duration::from_secs(1));
        assert!(!ring.is_low_bandwidth());
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_capacity_panics() {
        BandwidthRing::new(0, 1.0, 2.0);
    }
}
