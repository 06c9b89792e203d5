//! crates/wireq-request/src/state.rs
//!
//! # Overview
//!
//! [`RequestHandle`] is the request state machine: the
//! mutable lifecycle bookkeeping wrapped around an immutable
//! [`crate::request::Request`]. States progress `New -> Queued ->
//! (CacheHit | CacheMiss | NetworkInFlight) -> Delivered -> Finished`;
//! cancellation and joining are orthogonal flags layered on top from
//! `Queued` onward.
//!
//! # Invariants
//!
//! - Cancellation is monotonic: [`RequestHandle::cancel`] never un-cancels.
//! - [`RequestHandle::mark_finished`] returns `true` only on the
//!   transition that actually finished the request, so callers that race
//!   to finish a request (e.g. both dispatchers observing cancellation)
//!   never double-run finish-time bookkeeping.
//! - A request joined to a parent never executes itself; [`join_to`]
//!   records the parent link on the child and the waiter on the parent so
//!   [`RequestHandle::take_join_waiters`] can fan the parent's result out
//!   once, in submission order (`Vec` preserves push order).

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use wireq_codec::CacheHeader;
use wireq_queue::Prioritized;

use crate::error::RequestError;
use crate::priority::DeliveryType;
use crate::request::Request;
use crate::retry::RetryPolicy;

/// The request state machine: a [`Request`] plus its mutable lifecycle
/// state, shared across the submitter, both dispatchers, and the delivery
/// context via `Arc`.
pub struct RequestHandle {
    request: Arc<dyn Request>,
    tag: Option<String>,
    retry_policy: Arc<RetryPolicy>,
    sequence: i64,
    cancelled: AtomicBool,
    finished: AtomicBool,
    intermediate: AtomicBool,
    delivery_type: Mutex<DeliveryType>,
    cache_annotation: Mutex<Option<CacheHeader>>,
    joined_to: Mutex<Option<Arc<RequestHandle>>>,
    join_waiters: Mutex<Vec<Arc<RequestHandle>>>,
}

impl RequestHandle {
    /// Wraps `request` into a fresh handle with the given cancellation tag,
    /// retry policy, and submission sequence number.
    #[must_use]
    pub fn new(
        request: Arc<dyn Request>,
        tag: Option<String>,
        retry_policy: Arc<RetryPolicy>,
        sequence: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            request,
            tag,
            retry_policy,
            sequence,
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            intermediate: AtomicBool::new(false),
            delivery_type: Mutex::new(DeliveryType::None),
            cache_annotation: Mutex::new(None),
            joined_to: Mutex::new(None),
            join_waiters: Mutex::new(Vec::new()),
        })
    }

    /// The wrapped request.
    #[must_use]
    pub fn request(&self) -> &Arc<dyn Request> {
        &self.request
    }

    /// The opaque cancellation tag supplied at submission, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// This request's retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry_policy
    }

    /// The sequence number assigned on submission.
    #[must_use]
    pub fn sequence_number(&self) -> i64 {
        self.sequence
    }

    /// Cache key identity, forwarded from the wrapped request.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.request.cache_key()
    }

    /// Marks this request cancelled. Monotonic: calling this more than once
    /// has no further effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been observed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Transitions to `Finished`. Returns `true` only for the call that
    /// performed the transition.
    pub fn mark_finished(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether this request has already finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Marks this request as having already delivered an intermediate
    /// cache response while a network refresh is still in flight.
    pub fn mark_intermediate(&self) {
        self.intermediate.store(true, Ordering::Release);
    }

    /// Whether an intermediate cache delivery has already happened.
    #[must_use]
    pub fn is_intermediate(&self) -> bool {
        self.intermediate.load(Ordering::Acquire)
    }

    /// Records which delivery channel last fired for this request.
    pub fn set_delivery_type(&self, delivery_type: DeliveryType) {
        *self.delivery_type.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = delivery_type;
    }

    /// The last delivery channel that fired, if any.
    #[must_use]
    pub fn delivery_type(&self) -> DeliveryType {
        *self.delivery_type.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether either a cache or network delivery has already happened.
    #[must_use]
    pub fn has_had_response_delivered(&self) -> bool {
        self.delivery_type() != DeliveryType::None
    }

    /// Annotates this request with a stale cache entry (for conditional
    /// revalidation headers like `If-None-Match`/`If-Modified-Since`).
    pub fn annotate_cache_entry(&self, header: CacheHeader) {
        *self.cache_annotation.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(header);
    }

    /// The stale cache entry annotated onto this request, if any.
    #[must_use]
    pub fn cache_annotation(&self) -> Option<CacheHeader> {
        self.cache_annotation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Joins `child` to `parent`: `child` will never execute itself and
    /// will instead receive `parent`'s delivered result once it arrives.
    pub fn join_to(child: &Arc<RequestHandle>, parent: &Arc<RequestHandle>) {
        *child.joined_to.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(parent));
        parent
            .join_waiters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::clone(child));
    }

    /// Whether this request is joined to another in-flight request.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined_to
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Drains and returns the requests joined to this one, in join order.
    pub fn take_join_waiters(&self) -> Vec<Arc<RequestHandle>> {
        std::mem::take(&mut *self.join_waiters.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Delivers `value` to this request and fans it out to every request
    /// joined to it, unless cancellation has been observed, in which case
    /// the delivery is a no-op-but-finish.
    pub fn deliver_value(self: &Arc<Self>, delivery_type: DeliveryType, value: Arc<dyn Any + Send + Sync>) {
        if !self.is_cancelled() {
            self.request.deliver_response(Arc::clone(&value));
        }
        self.set_delivery_type(delivery_type);
        for waiter in self.take_join_waiters() {
            if !waiter.is_cancelled() {
                waiter.request.deliver_response(Arc::clone(&value));
            }
            waiter.set_delivery_type(delivery_type);
            waiter.mark_finished();
        }
    }

    /// Delivers `error` to this request (and its joined waiters) unless
    /// cancellation has been observed.
    pub fn deliver_error(self: &Arc<Self>, error: RequestError) {
        if !self.is_cancelled() {
            self.request.deliver_error(error);
        }
        for waiter in self.take_join_waiters() {
            if !waiter.is_cancelled() {
                waiter.request.deliver_error(RequestError::Network { status: None, latency: None });
            }
            waiter.mark_finished();
        }
    }
}

impl Prioritized for RequestHandle {
    fn priority_rank(&self) -> u8 {
        self.request.priority().rank()
    }

    fn sequence(&self) -> i64 {
        self.sequence
    }
}
