//! crates/wireq-queue/src/lib.rs
//!
//! # Overview
//!
//! A thread-safe blocking queue ordered by `(priority desc, sequence asc)`.
//! This is the "priority waitable queue" component: both the cache staging
//! queue and the network staging queue are instances of
//! [`PriorityQueue`], differing only in which worker(s) drain them.
//!
//! # Ordering
//!
//! Items are compared by [`Prioritized::priority_rank`] first (higher rank
//! drains first) and by [`Prioritized::sequence`] second (lower sequence
//! drains first). [`Sequencer`] is what produces those sequence numbers:
//! FIFO requests get `seq := next_fifo++`; LIFO requests get
//! `seq := i64::MAX - next_lifo++`. Because LIFO sequences start near
//! `i64::MAX`, every FIFO request at a given priority is numerically
//! smaller than every LIFO request at that priority, so the comparator
//! drains all FIFO entries before any LIFO entry without needing a
//! separate tie-break field.
//!
//! # Concurrency
//!
//! [`PriorityQueue::take`] blocks on a [`Condvar`] until an item is
//! available or the queue is closed. [`PriorityQueue::close`] wakes every
//! blocked `take` so worker threads can observe shutdown instead of
//! blocking forever; it is idempotent and monotonic like request
//! cancellation elsewhere in this workspace.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex};

/// Implemented by anything that can sit in a [`PriorityQueue`].
pub trait Prioritized {
    /// Higher values drain first.
    fn priority_rank(&self) -> u8;
    /// Lower values drain first within the same priority rank.
    fn sequence(&self) -> i64;
}

impl<T: Prioritized + ?Sized> Prioritized for std::sync::Arc<T> {
    fn priority_rank(&self) -> u8 {
        (**self).priority_rank()
    }
    fn sequence(&self) -> i64 {
        (**self).sequence()
    }
}

struct HeapEntry<T>(T);

impl<T: Prioritized> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority_rank() == other.0.priority_rank() && self.0.sequence() == other.0.sequence()
    }
}
impl<T: Prioritized> Eq for HeapEntry<T> {}

impl<T: Prioritized> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Prioritized> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: "greatest" item comes out first, so
        // higher priority_rank must compare Greater, and lower sequence
        // (drains first) must also compare Greater.
        self.0
            .priority_rank()
            .cmp(&other.0.priority_rank())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

struct Inner<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    closed: bool,
}

/// A blocking queue ordered by `(priority desc, sequence asc)`.
pub struct PriorityQueue<T: Prioritized> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `item`. Returns `false` without enqueueing if the queue is
    /// already closed.
    pub fn push(&self, item: T) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.closed {
            return false;
        }
        guard.heap.push(HeapEntry(item));
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available, returning `None` only once the
    /// queue has been [`close`](Self::close)d and drained.
    pub fn take(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(HeapEntry(item)) = guard.heap.pop() {
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            guard = self
                .not_empty
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Marks the queue closed and wakes every thread blocked in
    /// [`take`](Self::take). Already-queued items are still returned by
    /// subsequent `take` calls; only blocking for *new* items past this
    /// point is cut off.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.closed = true;
        self.not_empty.notify_all();
    }

    /// Current number of queued (not-yet-taken) items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .heap
            .len()
    }

    /// Returns `true` if no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assigns sequence numbers for FIFO/LIFO ordering. See module docs.
#[derive(Debug, Default)]
pub struct Sequencer {
    next_fifo: AtomicI64,
    next_lifo: AtomicI64,
}

impl Sequencer {
    /// Creates a sequencer starting both counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_fifo: AtomicI64::new(0),
            next_lifo: AtomicI64::new(0),
        }
    }

    /// Returns the next FIFO sequence number (monotonically increasing).
    pub fn next_fifo(&self) -> i64 {
        self.next_fifo.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Returns the next LIFO sequence number (monotonically decreasing from
    /// `i64::MAX`, so it always sorts after every FIFO sequence at the same
    /// priority).
    pub fn next_lifo(&self) -> i64 {
        let n = self.next_lifo.fetch_add(1, AtomicOrdering::Relaxed);
        i64::MAX - n
    }
}
