//! crates/wireq-dispatch/src/network_dispatcher.rs
//!
//! The network dispatcher pool: a configurable number of worker threads
//! that each loop on the network staging queue, perform the transport
//! round-trip, parse the result, write a cache entry if applicable, and
//! post the outcome through the shared delivery context. Memory-heavy
//! parsers (declared via `Request::is_memory_heavy`) run under one
//! process-wide mutex so peak body-parsing memory is bounded regardless
//! of pool size.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use wireq_bandwidth::BandwidthRing;
use wireq_cache::DiskCache;
use wireq_codec::CacheRecord;
use wireq_delivery::DeliveryContext;
use wireq_queue::PriorityQueue;
use wireq_request::transport::{NetworkError, NetworkResponse, Transport};
use wireq_request::{DeliveryType, ReturnStrategy, RequestError, RequestHandle};

use crate::panic_message;

/// Default worker thread count, matching typical mobile-client
/// configurations: enough parallelism to hide per-request latency without
/// saturating a constrained uplink.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// A pool of worker threads draining the network staging queue.
pub struct NetworkDispatcherPool {
    threads: Vec<JoinHandle<()>>,
}

impl NetworkDispatcherPool {
    /// Starts `worker_count` (clamped to at least 1) worker threads, all
    /// draining `staging`. `bandwidth`, if supplied, is fed one sample per
    /// completed (successful or failed) transport round-trip.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        staging: Arc<PriorityQueue<Arc<RequestHandle>>>,
        transport: Arc<dyn Transport>,
        cache: Arc<DiskCache>,
        delivery: Arc<dyn DeliveryContext>,
        parse_mutex: Arc<Mutex<()>>,
        bandwidth: Option<Arc<Mutex<BandwidthRing>>>,
        worker_count: usize,
    ) -> Self {
        let threads = (0..worker_count.max(1))
            .map(|index| {
                let staging = Arc::clone(&staging);
                let transport = Arc::clone(&transport);
                let cache = Arc::clone(&cache);
                let delivery = Arc::clone(&delivery);
                let parse_mutex = Arc::clone(&parse_mutex);
                let bandwidth = bandwidth.clone();
                thread::Builder::new()
                    .name(format!("wireq-network-dispatcher-{index}"))
                    .spawn(move || {
                        while let Some(handle) = staging.take() {
                            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                                dispatch_one(
                                    &handle,
                                    transport.as_ref(),
                                    cache.as_ref(),
                                    delivery.as_ref(),
                                    &parse_mutex,
                                    bandwidth.as_ref(),
                                );
                            }));
                            if let Err(payload) = outcome {
                                tracing::error!(
                                    error = %panic_message(payload.as_ref()),
                                    "network dispatcher: unexpected panic processing request"
                                );
                                delivery.post_error(
                                    Arc::clone(&handle),
                                    RequestError::Network { status: None, latency: None },
                                    true,
                                );
                            }
                        }
                    })
                    .expect("spawning network dispatcher thread")
            })
            .collect();
        Self { threads }
    }

    /// Blocks until every worker thread has exited (i.e. after the staging
    /// queue has been closed and drained).
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}

fn dispatch_one(
    handle: &Arc<RequestHandle>,
    transport: &dyn Transport,
    cache: &DiskCache,
    delivery: &dyn DeliveryContext,
    parse_mutex: &Mutex<()>,
    bandwidth: Option<&Arc<Mutex<BandwidthRing>>>,
) {
    if handle.is_cancelled() {
        handle.mark_finished();
        return;
    }

    let request = handle.request();
    let mut headers = request.headers();
    if let Some(cached) = handle.cache_annotation() {
        if let Some(etag) = &cached.etag {
            headers.insert("If-None-Match".to_owned(), etag.clone());
        }
    }
    let body = request.body();

    let start = Instant::now();
    let outcome = transport.perform_request(request.method(), request.url(), &headers, body.as_deref(), handle.retry_policy());
    let elapsed = start.elapsed();

    if let Some(ring) = bandwidth {
        let bytes = match &outcome {
            Ok(response) => response.body.len() as u64,
            Err(err) => err.response().map_or(0, |r| r.body.len() as u64),
        };
        ring.lock().unwrap_or_else(PoisonError::into_inner).record(bytes, elapsed);
    }

    match outcome {
        Ok(response) => handle_response(handle, response, cache, delivery, parse_mutex),
        Err(err) => handle_error(handle, &err, delivery),
    }
}

fn handle_response(handle: &Arc<RequestHandle>, response: NetworkResponse, cache: &DiskCache, delivery: &dyn DeliveryContext, parse_mutex: &Mutex<()>) {
    if response.not_modified && handle.has_had_response_delivered() {
        handle.mark_finished();
        return;
    }

    let request = handle.request();
    let parsed = if request.is_memory_heavy() {
        let _guard = parse_mutex.lock().unwrap_or_else(PoisonError::into_inner);
        request.parse_network_response(&response)
    } else {
        request.parse_network_response(&response)
    };

    match parsed {
        Ok(parsed) => {
            if request.should_cache() {
                if let Some(cache_header) = parsed.cache_header.clone() {
                    cache.put(
                        CacheRecord {
                            header: cache_header,
                            body: response.body.clone(),
                        },
                        request.should_cache_instantly(),
                    );
                }
            }
            if request.return_strategy() == ReturnStrategy::NetworkIfNoCache && handle.has_had_response_delivered() {
                handle.mark_finished();
            } else {
                delivery.post_response(Arc::clone(handle), DeliveryType::Network, parsed.value, true);
            }
        }
        Err(parse_err) => {
            tracing::warn!(key = %handle.cache_key(), error = %parse_err, "network response failed to parse");
            delivery.post_error(Arc::clone(handle), RequestError::from(parse_err), true);
        }
    }
}

fn handle_error(handle: &Arc<RequestHandle>, error: &NetworkError, delivery: &dyn DeliveryContext) {
    let request = handle.request();
    let refined = request.parse_network_error(error);
    let suppress = matches!(request.return_strategy(), ReturnStrategy::CacheIfNetworkFails | ReturnStrategy::NetworkIfNoCache)
        && handle.has_had_response_delivered();
    if suppress {
        handle.mark_finished();
    } else {
        delivery.post_error(Arc::clone(handle), refined, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wireq_codec::CacheHeader;
    use wireq_delivery::ThreadedDelivery;
    use wireq_request::{ParseError, ParsedResponse, Request, RetryPolicy};
    use wireq_test_support::{temp_cache, FakeClock, FakeTransport, RecordingRequest};

    fn handle(req: Arc<dyn Request>) -> Arc<RequestHandle> {
        RequestHandle::new(req, None, Arc::new(RetryPolicy::default()), 0)
    }

    fn parser(resp: &NetworkResponse) -> Result<ParsedResponse, ParseError> {
        Ok(ParsedResponse::cacheable(
            String::from_utf8_lossy(&resp.body).into_owned(),
            CacheHeader {
                key: "GET http://x/a".to_owned(),
                etag: Some("v1".to_owned()),
                server_date: 0,
                ttl: 60_000,
                soft_ttl: 30_000,
                keep_until: 0,
                is_image: false,
                response_headers: Vec::new(),
            },
        ))
    }

    #[test]
    fn successful_response_delivers_and_writes_cache() {
        let clock = FakeClock::new(0);
        let (_dir, cache) = temp_cache(1024 * 1024, clock);
        let transport = FakeTransport::new();
        transport.push_response(NetworkResponse {
            status: 200,
            body: b"hi".to_vec(),
            headers: Default::default(),
            not_modified: false,
        });
        let staging = Arc::new(PriorityQueue::new());
        let delivery = ThreadedDelivery::start();
        let req = RecordingRequest::new("GET", "http://x/a", parser);
        let h = handle(req.clone());
        staging.push(Arc::clone(&h));

        let pool = NetworkDispatcherPool::start(
            staging.clone(),
            transport,
            Arc::new(cache),
            delivery.clone(),
            Arc::new(Mutex::new(())),
            None,
            1,
        );
        staging.close();
        pool.join();
        delivery.stop();

        assert_eq!(req.delivery_count(), 1);
        assert!(h.is_finished());
    }

    #[test]
    fn not_modified_after_prior_delivery_finishes_without_redelivery() {
        let clock = FakeClock::new(0);
        let (_dir, cache) = temp_cache(1024 * 1024, clock);
        let transport = FakeTransport::new();
        transport.push_response(NetworkResponse {
            status: 304,
            body: Vec::new(),
            headers: Default::default(),
            not_modified: true,
        });
        let staging = Arc::new(PriorityQueue::new());
        let delivery = ThreadedDelivery::start();
        let req = RecordingRequest::new("GET", "http://x/a", |_resp| unreachable!());
        let h = handle(req.clone());
        h.set_delivery_type(DeliveryType::Cache);
        staging.push(Arc::clone(&h));

        let pool = NetworkDispatcherPool::start(
            staging.clone(),
            transport,
            Arc::new(cache),
            delivery.clone(),
            Arc::new(Mutex::new(())),
            None,
            1,
        );
        staging.close();
        pool.join();
        delivery.stop();

        assert_eq!(req.delivery_count(), 0);
        assert!(h.is_finished());
    }

    #[test]
    fn network_error_suppressed_when_cache_already_satisfied_request() {
        let clock = FakeClock::new(0);
        let (_dir, cache) = temp_cache(1024 * 1024, clock);
        let transport = FakeTransport::new();
        transport.push_error(NetworkError::Timeout { latency: None });
        let staging = Arc::new(PriorityQueue::new());
        let delivery = ThreadedDelivery::start();

        struct CacheIfFailsRequest(Arc<RecordingRequest>);
        impl Request for CacheIfFailsRequest {
            fn method(&self) -> &str {
                self.0.method()
            }
            fn url(&self) -> &str {
                self.0.url()
            }
            fn return_strategy(&self) -> ReturnStrategy {
                ReturnStrategy::CacheIfNetworkFails
            }
            fn parse_network_response(&self, response: &NetworkResponse) -> Result<ParsedResponse, ParseError> {
                self.0.parse_network_response(response)
            }
            fn deliver_response(&self, value: Arc<dyn std::any::Any + Send + Sync>) {
                self.0.deliver_response(value);
            }
            fn deliver_error(&self, error: RequestError) {
                self.0.deliver_error(error);
            }
        }

        let recording = RecordingRequest::new("GET", "http://x/a", |_resp| unreachable!());
        let req: Arc<dyn Request> = Arc::new(CacheIfFailsRequest(recording.clone()));
        let h = handle(req);
        h.set_delivery_type(DeliveryType::Cache);
        staging.push(Arc::clone(&h));

        let pool = NetworkDispatcherPool::start(
            staging.clone(),
            transport,
            Arc::new(cache),
            delivery.clone(),
            Arc::new(Mutex::new(())),
            None,
            1,
        );
        staging.close();
        pool.join();
        delivery.stop();

        assert!(recording.errors().is_empty());
        assert!(h.is_finished());
    }

    #[test]
    fn cancelled_before_dispatch_skips_transport_entirely() {
        let clock = FakeClock::new(0);
        let (_dir, cache) = temp_cache(1024 * 1024, clock);
        let transport = FakeTransport::new();
        let staging = Arc::new(PriorityQueue::new());
        let delivery = ThreadedDelivery::start();
        let req = RecordingRequest::new("GET", "http://x/a", |_resp| unreachable!());
        let h = handle(req);
        h.cancel();
        staging.push(Arc::clone(&h));

        let pool = NetworkDispatcherPool::start(
            staging.clone(),
            transport.clone(),
            Arc::new(cache),
            delivery,
            Arc::new(Mutex::new(())),
            None,
            1,
        );
        staging.close();
        pool.join();

        assert_eq!(transport.call_count(), 0);
        assert!(h.is_finished());
    }
}
