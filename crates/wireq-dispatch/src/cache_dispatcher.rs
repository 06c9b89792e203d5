//! crates/wireq-dispatch/src/cache_dispatcher.rs
//!
//! The single-threaded cache dispatcher: for every request it drains off
//! the cache staging queue, it consults the disk cache before the request
//! ever reaches the network. A miss or a hard-expired entry routes the
//! request straight to the network staging queue; a soft-expired entry
//! delivers the stale body immediately (without finishing the request) and
//! *also* routes to the network staging queue for a conditional refresh; a
//! soft-fresh entry delivers and finishes the request on its own.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use wireq_cache::{Clock, DiskCache};
use wireq_delivery::DeliveryContext;
use wireq_queue::PriorityQueue;
use wireq_request::transport::NetworkResponse;
use wireq_request::{DeliveryType, RequestError, RequestHandle};

use crate::panic_message;

/// Drains the cache staging queue on one dedicated thread.
pub struct CacheDispatcher {
    join: Option<JoinHandle<()>>,
}

impl CacheDispatcher {
    /// Starts the dispatcher thread. It runs until `staging` is closed and
    /// drained.
    #[must_use]
    pub fn start(
        staging: Arc<PriorityQueue<Arc<RequestHandle>>>,
        network_staging: Arc<PriorityQueue<Arc<RequestHandle>>>,
        cache: Arc<DiskCache>,
        clock: Arc<dyn Clock>,
        delivery: Arc<dyn DeliveryContext>,
    ) -> Self {
        let join = thread::Builder::new()
            .name("wireq-cache-dispatcher".to_owned())
            .spawn(move || {
                while let Some(handle) = staging.take() {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        dispatch_one(&handle, cache.as_ref(), network_staging.as_ref(), clock.as_ref(), delivery.as_ref());
                    }));
                    if let Err(payload) = outcome {
                        tracing::error!(
                            error = %panic_message(payload.as_ref()),
                            "cache dispatcher: unexpected panic processing request"
                        );
                        delivery.post_error(
                            Arc::clone(&handle),
                            RequestError::Network { status: None, latency: None },
                            true,
                        );
                    }
                }
            })
            .expect("spawning cache dispatcher thread");
        Self { join: Some(join) }
    }

    /// Blocks until the dispatcher thread has exited (i.e. after the
    /// staging queue it drains has been closed).
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn dispatch_one(
    handle: &Arc<RequestHandle>,
    cache: &DiskCache,
    network_staging: &PriorityQueue<Arc<RequestHandle>>,
    clock: &dyn Clock,
    delivery: &dyn DeliveryContext,
) {
    if handle.is_cancelled() {
        handle.mark_finished();
        return;
    }
    if handle.is_joined() {
        return;
    }

    let key = handle.cache_key();
    let Some(header) = cache.get_headers(&key) else {
        network_staging.push(Arc::clone(handle));
        return;
    };

    let now = clock.now_ms();
    if header.ttl < now {
        handle.annotate_cache_entry(header);
        network_staging.push(Arc::clone(handle));
        return;
    }

    let Some(record) = cache.get(&key) else {
        // The header survived in the index but the body is gone (raced
        // with eviction, or the on-disk file failed to read) — miss.
        network_staging.push(Arc::clone(handle));
        return;
    };

    let synthetic = NetworkResponse {
        status: 200,
        headers: record.header.response_headers.iter().cloned().collect(),
        body: record.body,
        not_modified: false,
    };

    match handle.request().parse_network_response(&synthetic) {
        Ok(parsed) => {
            if header.soft_ttl < now {
                handle.mark_intermediate();
                handle.annotate_cache_entry(header);
                // Recorded synchronously, not left to the delivery worker's
                // `deliver_value`: a `NetworkDispatcherPool` worker can pop
                // `handle` off `network_staging` and check
                // `has_had_response_delivered()` before an async
                // `ThreadedDelivery` has processed the queued post_response.
                handle.set_delivery_type(DeliveryType::Cache);
                delivery.post_response(Arc::clone(handle), DeliveryType::Cache, parsed.value, false);
                network_staging.push(Arc::clone(handle));
            } else {
                delivery.post_response(Arc::clone(handle), DeliveryType::Cache, parsed.value, true);
            }
        }
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "cached record failed to parse; falling back to network");
            network_staging.push(Arc::clone(handle));
        }
    }
}
