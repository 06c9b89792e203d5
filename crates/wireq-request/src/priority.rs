//! crates/wireq-request/src/priority.rs
//!
//! Declared request priority, fetch order, and return strategy.

/// Declared priority of a request. Ordered `Background < Low < Normal <
/// High < Immediate`; the dispatch queues drain higher priorities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Prefetch-class work with no user waiting on it.
    Background,
    /// Below-default priority.
    Low,
    /// Default priority for ordinary requests.
    Normal,
    /// User-visible, time-sensitive work.
    High,
    /// Must-run-now work (e.g. a user-initiated retry).
    Immediate,
}

impl Priority {
    /// Maps to the rank `wireq-queue`'s comparator orders by (higher drains
    /// first).
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Priority::Background => 0,
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Immediate => 4,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Whether same-priority requests drain in submission order (`Fifo`) or
/// reverse submission order (`Lifo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchOrder {
    /// First submitted, first dispatched.
    #[default]
    Fifo,
    /// Last submitted, first dispatched.
    Lifo,
}

/// Per-request policy governing which of a cache hit and a network
/// response are delivered, and whether one can suppress the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReturnStrategy {
    /// Deliver both a soft-expired cache hit and the subsequent network
    /// refresh.
    #[default]
    Double,
    /// Suppress the network result if a cache response already fired.
    NetworkIfNoCache,
    /// Suppress network *errors* (not successes) if a cache response
    /// already fired.
    CacheIfNetworkFails,
    /// Skip the cache lookup entirely; route straight to the network
    /// staging queue.
    NetworkOnly,
}

/// Which delivery (if any) a request has received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryType {
    /// No delivery has happened yet.
    #[default]
    None,
    /// Delivered from the disk cache.
    Cache,
    /// Delivered from the network.
    Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_as_declared() {
        assert!(Priority::Background < Priority::Low);
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Immediate);
    }

    #[test]
    fn rank_is_monotonic_with_ordering() {
        let mut ranks: Vec<u8> = vec![
            Priority::Immediate.rank(),
            Priority::Background.rank(),
            Priority::Normal.rank(),
        ];
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 2, 4]);
    }

    #[test]
    fn default_priority_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
