//! crates/wireq/src/lib.rs
//!
//! # Overview
//!
//! The public facade: [`RequestQueueFacade`] wires together the cache and
//! network staging queues, their dispatchers, the disk cache, and a
//! delivery context into the single object callers submit requests to.
//! [`Config`] holds its tunables; [`requests`] supplies ready-made
//! [`Request`](wireq_request::Request) kinds; [`freshness`] derives cache
//! policy from response headers.
//!
//! # Coalescing
//!
//! Two in-flight requests sharing a cache key are joined rather than both
//! executed: the second submission attaches itself to the first via
//! [`wireq_request::RequestHandle::join_to`] and receives the first's
//! result when it arrives. The in-flight table entry for a finished
//! request is removed eagerly by the delivery wrapper, so the common case
//! never relies on the next submission noticing staleness — but
//! [`add`](RequestQueueFacade::add) still guards against a race where a
//! finished entry hasn't been swept yet, by replacing it outright rather
//! than joining to a request that will never deliver again.

#![deny(unsafe_code)]

pub mod freshness;
pub mod requests;

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use wireq_bandwidth::BandwidthRing;
use wireq_cache::{CacheError, Clock, DiskCache, SystemClock};
use wireq_delivery::{DeliveryContext, ThreadedDelivery};
use wireq_dispatch::{CacheDispatcher, NetworkDispatcherPool};
use wireq_queue::{PriorityQueue, Sequencer};
use wireq_request::transport::Transport;
use wireq_request::{DeliveryType, FetchOrder, Request, RequestError, RequestHandle, RetryPolicy};

pub use requests::{JsonRequest, StringRequest};

/// Tunables for a [`RequestQueueFacade`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the disk cache is rooted at.
    pub cache_root: PathBuf,
    /// Upper bound on total on-disk cache size.
    pub max_cache_bytes: u64,
    /// Delay between a deferred cache write and its disk flush.
    pub write_behind_delay: Duration,
    /// Number of network dispatcher worker threads.
    pub worker_count: usize,
}

impl Config {
    /// Starts from the workspace's defaults, rooted at `cache_root`.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            max_cache_bytes: wireq_cache::DEFAULT_MAX_BYTES,
            write_behind_delay: wireq_cache::DEFAULT_WRITE_BEHIND_DELAY,
            worker_count: wireq_dispatch::DEFAULT_WORKER_COUNT,
        }
    }
}

/// Wraps the real delivery context so that a request's entries in the
/// in-flight tables are swept out the moment it actually finishes, instead
/// of waiting for the next submission under the same cache key to notice.
struct SweepingDelivery {
    inner: Arc<dyn DeliveryContext>,
    in_flight: Arc<DashMap<String, Arc<RequestHandle>>>,
    submitted: Arc<DashMap<i64, Arc<RequestHandle>>>,
}

fn sweep(in_flight: &DashMap<String, Arc<RequestHandle>>, submitted: &DashMap<i64, Arc<RequestHandle>>, handle: &Arc<RequestHandle>) {
    if !handle.is_finished() {
        return;
    }
    submitted.remove(&handle.sequence_number());
    in_flight.remove_if(handle.cache_key().as_str(), |_, owner| Arc::ptr_eq(owner, handle));
}

impl DeliveryContext for SweepingDelivery {
    fn post_response(&self, request: Arc<RequestHandle>, delivery_type: DeliveryType, value: Arc<dyn Any + Send + Sync>, finish: bool) {
        self.inner.post_response(Arc::clone(&request), delivery_type, value, finish);
        self.schedule_sweep(request);
    }

    fn post_error(&self, request: Arc<RequestHandle>, error: RequestError, finish: bool) {
        self.inner.post_error(Arc::clone(&request), error, finish);
        self.schedule_sweep(request);
    }

    fn post(&self, runnable: Box<dyn FnOnce() + Send>) {
        self.inner.post(runnable);
    }
}

impl SweepingDelivery {
    /// Queues the sweep check behind the delivery just posted, rather than
    /// running it inline: a [`ThreadedDelivery`] only sends `post_response`/
    /// `post_error` onto its worker's channel, so `request` may not have
    /// actually finished yet by the time `post_response` returns here.
    /// `DeliveryContext::post` is processed by the same single worker in
    /// the order it was queued, so a sweep queued immediately after always
    /// observes the delivery it follows.
    fn schedule_sweep(&self, request: Arc<RequestHandle>) {
        let in_flight = Arc::clone(&self.in_flight);
        let submitted = Arc::clone(&self.submitted);
        self.inner.post(Box::new(move || sweep(&in_flight, &submitted, &request)));
    }
}

/// The request queue facade: the single entry point callers submit
/// requests to and cancel them through.
pub struct RequestQueueFacade {
    cache_staging: Arc<PriorityQueue<Arc<RequestHandle>>>,
    network_staging: Arc<PriorityQueue<Arc<RequestHandle>>>,
    sequencer: Sequencer,
    in_flight: Arc<DashMap<String, Arc<RequestHandle>>>,
    submitted: Arc<DashMap<i64, Arc<RequestHandle>>>,
    cache: Arc<DiskCache>,
    delivery: Arc<dyn DeliveryContext>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    parse_mutex: Arc<Mutex<()>>,
    bandwidth: Option<Arc<Mutex<BandwidthRing>>>,
    worker_count: usize,
    cache_dispatcher: Mutex<Option<CacheDispatcher>>,
    network_pool: Mutex<Option<NetworkDispatcherPool>>,
}

impl RequestQueueFacade {
    /// Builds a facade using the real wall clock and a freshly started
    /// [`ThreadedDelivery`] worker. Does not start the dispatchers; call
    /// [`start`](Self::start) before submitting requests.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache root can't be created or
    /// scanned.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Arc<Self>, CacheError> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// As [`new`](Self::new), with an injectable [`Clock`] for
    /// deterministic tests.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache root can't be created or
    /// scanned.
    pub fn with_clock(config: Config, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Result<Arc<Self>, CacheError> {
        Self::build(config, transport, clock, ThreadedDelivery::start())
    }

    /// Fully explicit constructor, for tests that supply their own
    /// [`DeliveryContext`] (e.g. a synchronous recorder).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache root can't be created or
    /// scanned.
    pub fn build(config: Config, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, delivery: Arc<dyn DeliveryContext>) -> Result<Arc<Self>, CacheError> {
        let cache = DiskCache::with_clock(config.cache_root, config.max_cache_bytes, Arc::clone(&clock), config.write_behind_delay);
        cache.initialize()?;

        let in_flight = Arc::new(DashMap::new());
        let submitted = Arc::new(DashMap::new());
        let sweeping = Arc::new(SweepingDelivery {
            inner: delivery,
            in_flight: Arc::clone(&in_flight),
            submitted: Arc::clone(&submitted),
        });

        Ok(Arc::new(Self {
            cache_staging: Arc::new(PriorityQueue::new()),
            network_staging: Arc::new(PriorityQueue::new()),
            sequencer: Sequencer::new(),
            in_flight,
            submitted,
            cache: Arc::new(cache),
            delivery: sweeping,
            transport,
            clock,
            parse_mutex: Arc::new(Mutex::new(())),
            bandwidth: None,
            worker_count: config.worker_count,
            cache_dispatcher: Mutex::new(None),
            network_pool: Mutex::new(None),
        }))
    }

    /// Attaches a shared bandwidth sample ring, fed one sample per
    /// completed network round-trip. Has no effect once
    /// [`start`](Self::start) has already spawned the network dispatcher
    /// pool.
    pub fn set_bandwidth(&mut self, bandwidth: Arc<Mutex<BandwidthRing>>) {
        self.bandwidth = Some(bandwidth);
    }

    /// Starts the cache dispatcher thread and the network dispatcher pool.
    /// Idempotent: a second call is a no-op while the dispatchers are
    /// already running.
    pub fn start(&self) {
        let mut cache_dispatcher = self.cache_dispatcher.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if cache_dispatcher.is_none() {
            *cache_dispatcher = Some(CacheDispatcher::start(
                Arc::clone(&self.cache_staging),
                Arc::clone(&self.network_staging),
                Arc::clone(&self.cache),
                Arc::clone(&self.clock),
                Arc::clone(&self.delivery),
            ));
        }
        drop(cache_dispatcher);

        let mut network_pool = self.network_pool.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if network_pool.is_none() {
            *network_pool = Some(NetworkDispatcherPool::start(
                Arc::clone(&self.network_staging),
                Arc::clone(&self.transport),
                Arc::clone(&self.cache),
                Arc::clone(&self.delivery),
                Arc::clone(&self.parse_mutex),
                self.bandwidth.clone(),
                self.worker_count,
            ));
        }
    }

    /// Closes both staging queues and waits for the dispatchers to exit.
    /// Idempotent: calling this more than once, or before
    /// [`start`](Self::start), is a no-op.
    pub fn stop(&self) {
        self.cache_staging.close();
        self.network_staging.close();
        if let Some(dispatcher) = self.cache_dispatcher.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            dispatcher.join();
        }
        if let Some(pool) = self.network_pool.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            pool.join();
        }
    }

    fn submit(&self, handle: &Arc<RequestHandle>) {
        if handle.request().return_strategy() == wireq_request::ReturnStrategy::NetworkOnly {
            self.network_staging.push(Arc::clone(handle));
        } else {
            self.cache_staging.push(Arc::clone(handle));
        }
    }

    /// Submits `request` for dispatch, returning the handle callers use to
    /// track or cancel it. A request sharing a cache key with one already
    /// in flight is joined to it rather than dispatched again.
    pub fn add(&self, request: Arc<dyn Request>, tag: Option<String>) -> Arc<RequestHandle> {
        let sequence = match request.fetch_order() {
            FetchOrder::Fifo => self.sequencer.next_fifo(),
            FetchOrder::Lifo => self.sequencer.next_lifo(),
        };
        let retry_policy = Arc::new(RetryPolicy::default());
        let handle = RequestHandle::new(request, tag, retry_policy, sequence);
        self.submitted.insert(sequence, Arc::clone(&handle));

        let key = handle.cache_key();
        match self.in_flight.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_finished() {
                    occupied.insert(Arc::clone(&handle));
                    self.submit(&handle);
                } else {
                    RequestHandle::join_to(&handle, occupied.get());
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&handle));
                self.submit(&handle);
            }
        }
        handle
    }

    /// Eagerly removes `handle` from the in-flight coalescing table and
    /// the submitted-request set. A no-op if `handle` isn't the table's
    /// current owner for its cache key (already superseded) or isn't
    /// tracked (already finished and swept).
    pub fn finish(&self, handle: &Arc<RequestHandle>) {
        sweep(&self.in_flight, &self.submitted, handle);
    }

    /// Cancels every currently-submitted request carrying `tag`.
    pub fn cancel_all_with_tag(&self, tag: &str) {
        self.cancel_all_where(|handle| handle.tag() == Some(tag));
    }

    /// Cancels every currently-submitted request matching `predicate`.
    pub fn cancel_all_where(&self, predicate: impl Fn(&Arc<RequestHandle>) -> bool) {
        for entry in self.submitted.iter() {
            if predicate(entry.value()) {
                entry.value().cancel();
            }
        }
    }

    /// Number of requests currently tracked as submitted (in flight or
    /// queued; does not include requests already swept after finishing).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.submitted.len()
    }
}

impl Drop for RequestQueueFacade {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireq_request::transport::{NetworkError, NetworkResponse};
    use wireq_request::ParsedResponse;
    use wireq_test_support::{FakeClock, FakeTransport, RecordingDelivery, RecordingRequest};

    fn facade(transport: Arc<FakeTransport>, clock: Arc<FakeClock>, delivery: Arc<RecordingDelivery>, dir: &tempfile::TempDir) -> Arc<RequestQueueFacade> {
        let config = Config::new(dir.path().to_path_buf());
        RequestQueueFacade::build(config, transport, clock, delivery).expect("build facade")
    }

    #[test]
    fn add_dispatches_a_request_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new(0);
        let transport = FakeTransport::new();
        transport.push_response(NetworkResponse {
            status: 200,
            body: b"hi".to_vec(),
            headers: Default::default(),
            not_modified: false,
        });
        let delivery = RecordingDelivery::new();
        let facade = facade(transport, clock, delivery.clone(), &dir);
        facade.start();

        let req = RecordingRequest::new("GET", "http://x/a", |resp| {
            Ok(ParsedResponse::uncacheable(String::from_utf8_lossy(&resp.body).into_owned()))
        });
        let handle = facade.add(req.clone(), None);

        for _ in 0..200 {
            if handle.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(handle.is_finished());
        assert_eq!(req.delivery_count(), 1);
    }

    #[test]
    fn second_submission_under_same_cache_key_is_joined_not_redispatched() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new(0);
        let transport = FakeTransport::new();
        transport.push_error(NetworkError::Timeout { latency: None });
        let delivery = RecordingDelivery::new();
        let facade = facade(transport.clone(), clock, delivery, &dir);
        // Deliberately do not start the dispatchers: both submissions stay
        // queued, so we can assert the second joined the first without a
        // race against the worker threads draining them.

        let req_a = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let req_b = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let handle_a = facade.add(req_a, None);
        let handle_b = facade.add(req_b, None);

        assert!(handle_b.is_joined());
        assert_eq!(facade.in_flight_count(), 2);
        assert!(!handle_a.is_joined());
    }

    #[test]
    fn finished_entry_is_replaced_rather_than_joined_on_resubmission() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new(0);
        let transport = FakeTransport::new();
        let delivery = RecordingDelivery::new();
        let facade = facade(transport, clock, delivery, &dir);

        let req_a = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let handle_a = facade.add(req_a, None);
        handle_a.mark_finished();
        facade.finish(&handle_a);

        let req_b = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let handle_b = facade.add(req_b, None);
        assert!(!handle_b.is_joined());
    }

    #[test]
    fn cancel_all_with_tag_cancels_only_matching_requests() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new(0);
        let transport = FakeTransport::new();
        let delivery = RecordingDelivery::new();
        let facade = facade(transport, clock, delivery, &dir);

        let req_a = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let req_b = RecordingRequest::new("GET", "http://x/b", |_r| unreachable!());
        let handle_a = facade.add(req_a, Some("batch-1".to_owned()));
        let handle_b = facade.add(req_b, Some("batch-2".to_owned()));

        facade.cancel_all_with_tag("batch-1");

        assert!(handle_a.is_cancelled());
        assert!(!handle_b.is_cancelled());
    }

    #[test]
    fn finish_is_a_no_op_when_handle_has_not_finished() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new(0);
        let transport = FakeTransport::new();
        let delivery = RecordingDelivery::new();
        let facade = facade(transport, clock, delivery, &dir);

        let req = RecordingRequest::new("GET", "http://x/a", |_r| unreachable!());
        let handle = facade.add(req, None);
        facade.finish(&handle);
        assert_eq!(facade.in_flight_count(), 1);
    }
}
