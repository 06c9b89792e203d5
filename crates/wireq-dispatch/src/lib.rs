//! crates/wireq-dispatch/src/lib.rs
//!
//! The two worker fabrics that drain the staging queues: [`CacheDispatcher`]
//! (one thread, consults the disk cache first) and
//! [`network_dispatcher::NetworkDispatcherPool`] (a configurable number of
//! threads that actually perform the network round-trip). Both are long
//! lived: they run `PriorityQueue::take` in a loop until the queue they
//! drain is closed.

#![deny(unsafe_code)]

mod cache_dispatcher;
mod network_dispatcher;

pub use cache_dispatcher::CacheDispatcher;
pub use network_dispatcher::{NetworkDispatcherPool, DEFAULT_WORKER_COUNT};

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
