//! crates/wireq-delivery/src/lib.rs
//!
//! # Overview
//!
//! Posts request outcomes onto a single logical delivery context (e.g. a
//! UI thread). Deliveries for a given request are totally ordered because
//! every post goes through one channel drained by one thread; a delivery
//! that finds the request cancelled at execution time still runs (the
//! value/error is dropped rather than handed to the listener) but always
//! finishes the request, even when it would otherwise have been an
//! intermediate (non-finishing) delivery.

#![deny(unsafe_code)]

use std::any::Any;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use wireq_request::{DeliveryType, RequestError, RequestHandle};

enum DeliveryOp {
    Response {
        request: Arc<RequestHandle>,
        delivery_type: DeliveryType,
        value: Arc<dyn Any + Send + Sync>,
        finish: bool,
    },
    Error {
        request: Arc<RequestHandle>,
        error: RequestError,
        finish: bool,
    },
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Accepts request outcomes and runs them on a single logical context.
pub trait DeliveryContext: Send + Sync {
    /// Posts a successful delivery for `request`. `finish` marks whether
    /// this is the request's terminal delivery (a soft-expired cache hit
    /// ahead of a network refresh is not).
    fn post_response(
        &self,
        request: Arc<RequestHandle>,
        delivery_type: DeliveryType,
        value: Arc<dyn Any + Send + Sync>,
        finish: bool,
    );

    /// Posts an error delivery for `request`.
    fn post_error(&self, request: Arc<RequestHandle>, error: RequestError, finish: bool);

    /// Posts an arbitrary callback to run on the delivery context, after
    /// every already-queued delivery (used for marker log flushes).
    fn post(&self, runnable: Box<dyn FnOnce() + Send>);
}

/// A [`DeliveryContext`] backed by one dedicated worker thread.
pub struct ThreadedDelivery {
    sender: Sender<DeliveryOp>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ThreadedDelivery {
    /// Starts the delivery worker thread.
    #[must_use]
    pub fn start() -> Arc<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<DeliveryOp>();
        let join = std::thread::Builder::new()
            .name("wireq-delivery".to_owned())
            .spawn(move || {
                for op in receiver {
                    match op {
                        DeliveryOp::Response {
                            request,
                            delivery_type,
                            value,
                            finish,
                        } => {
                            let cancelled = request.is_cancelled();
                            request.deliver_value(delivery_type, value);
                            if finish || cancelled {
                                request.mark_finished();
                            }
                        }
                        DeliveryOp::Error { request, error, finish } => {
                            let cancelled = request.is_cancelled();
                            request.deliver_error(error);
                            if finish || cancelled {
                                request.mark_finished();
                            }
                        }
                        DeliveryOp::Run(runnable) => runnable(),
                        DeliveryOp::Shutdown => break,
                    }
                }
            })
            .expect("spawning delivery worker thread");
        Arc::new(Self {
            sender,
            join: Mutex::new(Some(join)),
        })
    }

    /// Signals the worker thread to stop after draining queued deliveries,
    /// and waits for it to exit.
    pub fn stop(&self) {
        let _ = self.sender.send(DeliveryOp::Shutdown);
        if let Some(join) = self.join.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = join.join();
        }
    }
}

impl DeliveryContext for ThreadedDelivery {
    fn post_response(
        &self,
        request: Arc<RequestHandle>,
        delivery_type: DeliveryType,
        value: Arc<dyn Any + Send + Sync>,
        finish: bool,
    ) {
        let _ = self.sender.send(DeliveryOp::Response {
            request,
            delivery_type,
            value,
            finish,
        });
    }

    fn post_error(&self, request: Arc<RequestHandle>, error: RequestError, finish: bool) {
        let _ = self.sender.send(DeliveryOp::Error { request, error, finish });
    }

    fn post(&self, runnable: Box<dyn FnOnce() + Send>) {
        let _ = self.sender.send(DeliveryOp::Run(runnable));
    }
}

impl Drop for ThreadedDelivery {
    fn drop(&mut self) {
        self.stop();
    }
}
