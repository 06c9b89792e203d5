//! crates/wireq-test-support/src/lib.rs
//!
//! Fakes and test doubles shared across this workspace's test suites:
//! a deterministic [`FakeClock`], a scriptable [`FakeTransport`], and a
//! [`RecordingRequest`] whose deliveries/errors are inspectable after the
//! fact instead of being consumed by an opaque callback.

#![deny(unsafe_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use wireq_cache::Clock;
use wireq_delivery::DeliveryContext;
use wireq_request::transport::{NetworkError, NetworkResponse, Transport};
use wireq_request::{DeliveryType, ParseError, ParsedResponse, Request, RequestError, RequestHandle, RetryPolicy};

/// A clock whose `now_ms()` is set and advanced explicitly, so TTL/soft-TTL
/// comparisons in tests never depend on wall-clock timing.
#[derive(Debug)]
pub struct FakeClock {
    now_ms: AtomicI64,
}

impl FakeClock {
    /// Creates a clock starting at `start_ms`.
    #[must_use]
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(start_ms),
        })
    }

    /// Moves the clock forward by `delta_ms` (may be negative).
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, value_ms: i64) {
        self.now_ms.store(value_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// A canned transport: callers queue up `Result<NetworkResponse,
/// NetworkError>` values up front, and each `perform_request` call pops the
/// next one in FIFO order. Every call is recorded for assertions like
/// "the transport was invoked exactly once" (join/coalescing tests).
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<NetworkResponse, NetworkError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues `response` to be returned by the next `perform_request` call.
    pub fn push_response(&self, response: NetworkResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queues `error` to be returned by the next `perform_request` call.
    pub fn push_error(&self, error: NetworkError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Every `(method, url)` pair this transport has been invoked with, in
    /// call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `perform_request` has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn perform_request(
        &self,
        method: &str,
        url: &str,
        _headers: &std::collections::HashMap<String, String>,
        _body: Option<&[u8]>,
        _retry: &RetryPolicy,
    ) -> Result<NetworkResponse, NetworkError> {
        self.calls.lock().unwrap().push((method.to_owned(), url.to_owned()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(NetworkError::NoConnection { latency: None }))
    }
}

type ParseFn = dyn Fn(&NetworkResponse) -> Result<ParsedResponse, ParseError> + Send + Sync;

/// A [`Request`] whose parsing is supplied by a closure and whose
/// deliveries/errors are recorded into shared, externally-inspectable
/// vectors rather than consumed opaquely.
pub struct RecordingRequest {
    method: String,
    url: String,
    cache_key: String,
    parse: Box<ParseFn>,
    delivered: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingRequest {
    /// Builds a request for `method url` whose network response is parsed
    /// by `parse` and whose cache key defaults to `"{method} {url}"`.
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        parse: impl Fn(&NetworkResponse) -> Result<ParsedResponse, ParseError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let method = method.into();
        let url = url.into();
        let cache_key = format!("{method} {url}");
        Arc::new(Self {
            method,
            url,
            cache_key,
            parse: Box::new(parse),
            delivered: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        })
    }

    /// Every value delivered to this request so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.delivered.lock().unwrap().clone()
    }

    /// Every error message delivered to this request so far.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Number of successful deliveries so far.
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl Request for RecordingRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }

    fn parse_network_response(&self, response: &NetworkResponse) -> Result<ParsedResponse, ParseError> {
        (self.parse)(response)
    }

    fn deliver_response(&self, value: Arc<dyn Any + Send + Sync>) {
        self.delivered.lock().unwrap().push(value);
    }

    fn deliver_error(&self, error: RequestError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Which channel a [`RecordingDelivery`] event came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// A successful cache delivery.
    Cache,
    /// A successful network delivery.
    Network,
    /// An error delivery.
    Error,
}

/// A synchronous, in-process [`DeliveryContext`] that records every posted
/// event as `(sequence_number, DeliveryKind, body)` in post order, for
/// asserting total ordering and delivery counts without a worker thread to
/// synchronize with. Unlike `ThreadedDelivery`, deliveries run on the
/// calling thread; the request's listener is still invoked and
/// `mark_finished` still fires under the same cancelled-still-finishes
/// rule.
#[derive(Default)]
pub struct RecordingDelivery {
    events: Mutex<Vec<(i64, DeliveryKind, String)>>,
}

impl RecordingDelivery {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event recorded so far, in post order.
    #[must_use]
    pub fn events(&self) -> Vec<(i64, DeliveryKind, String)> {
        self.events.lock().unwrap().clone()
    }
}

fn describe_value(value: &Arc<dyn Any + Send + Sync>) -> String {
    value
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "<opaque>".to_owned())
}

impl DeliveryContext for RecordingDelivery {
    fn post_response(&self, request: Arc<RequestHandle>, delivery_type: DeliveryType, value: Arc<dyn Any + Send + Sync>, finish: bool) {
        let kind = match delivery_type {
            DeliveryType::Cache => DeliveryKind::Cache,
            DeliveryType::Network | DeliveryType::None => DeliveryKind::Network,
        };
        self.events
            .lock()
            .unwrap()
            .push((request.sequence_number(), kind, describe_value(&value)));
        let cancelled = request.is_cancelled();
        request.deliver_value(delivery_type, value);
        if finish || cancelled {
            request.mark_finished();
        }
    }

    fn post_error(&self, request: Arc<RequestHandle>, error: RequestError, finish: bool) {
        self.events
            .lock()
            .unwrap()
            .push((request.sequence_number(), DeliveryKind::Error, error.to_string()));
        let cancelled = request.is_cancelled();
        request.deliver_error(error);
        if finish || cancelled {
            request.mark_finished();
        }
    }

    fn post(&self, runnable: Box<dyn FnOnce() + Send>) {
        runnable();
    }
}

/// Creates a fresh, already-[`initialize`](wireq_cache::DiskCache::initialize)d
/// disk cache rooted in a freshly created temp directory, and returns the
/// directory alongside it so the caller controls its lifetime.
///
/// # Panics
///
/// Panics if the temp directory can't be created or the cache fails to
/// initialize — both indicate a broken test environment, not a cache bug.
#[must_use]
pub fn temp_cache(max_bytes: u64, clock: Arc<dyn Clock>) -> (tempfile::TempDir, wireq_cache::DiskCache) {
    let dir = tempfile::tempdir().expect("create temp cache dir");
    let cache = wireq_cache::DiskCache::with_clock(
        dir.path().to_path_buf(),
        max_bytes,
        clock,
        wireq_cache::DEFAULT_WRITE_BEHIND_DELAY,
    );
    cache.initialize().expect("initialize temp cache");
    (dir, cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireq_request::ParsedResponse;

    #[test]
    fn fake_transport_replays_queued_responses_in_order() {
        let transport = FakeTransport::new();
        transport.push_response(NetworkResponse {
            status: 200,
            body: b"one".to_vec(),
            headers: Default::default(),
            not_modified: false,
        });
        transport.push_error(NetworkError::Timeout { latency: None });

        let retry = RetryPolicy::default();
        let first = transport.perform_request("GET", "http://x/a", &Default::default(), None, &retry);
        assert!(first.is_ok());
        let second = transport.perform_request("GET", "http://x/b", &Default::default(), None, &retry);
        assert!(matches!(second, Err(NetworkError::Timeout { .. })));
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn fake_clock_advances_and_sets() {
        let clock = FakeClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1500);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn recording_request_captures_deliveries() {
        let request = RecordingRequest::new("GET", "http://x/a", |response| {
            Ok(ParsedResponse::uncacheable(String::from_utf8_lossy(&response.body).into_owned()))
        });
        let response = NetworkResponse {
            status: 200,
            body: b"hi".to_vec(),
            headers: Default::default(),
            not_modified: false,
        };
        let parsed = request.parse_network_response(&response).unwrap();
        request.deliver_response(parsed.value);
        assert_eq!(request.delivery_count(), 1);
    }

    #[test]
    fn recording_delivery_preserves_post_order_and_finish_semantics() {
        let delivery = RecordingDelivery::new();
        let req = RecordingRequest::new("GET", "http://x/a", |_resp| unreachable!());
        let handle = RequestHandle::new(req.clone(), None, Arc::new(wireq_request::RetryPolicy::default()), 7);

        delivery.post_response(handle.clone(), DeliveryType::Cache, Arc::new("stale".to_owned()), false);
        delivery.post_response(handle.clone(), DeliveryType::Network, Arc::new("fresh".to_owned()), true);

        let events = delivery.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (7, DeliveryKind::Cache, "stale".to_owned()));
        assert_eq!(events[1], (7, DeliveryKind::Network, "fresh".to_owned()));
        assert!(handle.is_finished());
        assert_eq!(req.delivery_count(), 2);
    }

    #[test]
    fn temp_cache_round_trips() {
        let clock = FakeClock::new(0);
        let (_dir, cache) = temp_cache(1024, clock);
        assert_eq!(cache.len(), 0);
    }
}
