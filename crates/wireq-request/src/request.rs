//! crates/wireq-request/src/request.rs
//!
//! The polymorphic request contract. Concrete body kinds (string, JSON,
//! image, ...) are separate implementations of this trait rather than
//! subclasses, exposing parse/deliver behavior alongside static
//! configuration (method, URL, headers, retry, priority, ...).

use std::collections::HashMap;

use crate::parse::{ParseError, ParsedResponse};
use crate::priority::{FetchOrder, Priority, ReturnStrategy};
use crate::transport::{NetworkError, NetworkResponse};

/// Static configuration and behavior for one request. Lifecycle state
/// (cancellation, sequencing, delivery bookkeeping) lives in
/// [`crate::state::RequestHandle`], not here — a `Request` impl describes
/// *what* to fetch and how to parse/deliver it, never *whether* it has
/// fired yet.
pub trait Request: Send + Sync {
    /// HTTP method, e.g. `"GET"`.
    fn method(&self) -> &str;

    /// Request URL.
    fn url(&self) -> &str;

    /// Request headers to send.
    fn headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Request body to send, if any.
    fn body(&self) -> Option<Vec<u8>> {
        None
    }

    /// Cache key identity. Defaults to `"{method} {url}"`.
    fn cache_key(&self) -> String {
        format!("{} {}", self.method(), self.url())
    }

    /// Declared priority.
    fn priority(&self) -> Priority {
        Priority::default()
    }

    /// FIFO or LIFO tie-break among same-priority requests.
    fn fetch_order(&self) -> FetchOrder {
        FetchOrder::default()
    }

    /// Whether a successful, cacheable response should be written to disk.
    fn should_cache(&self) -> bool {
        true
    }

    /// Whether a stale cache entry may still be served when offline /
    /// the network is unreachable.
    fn offline_cache(&self) -> bool {
        false
    }

    /// Governs whether cache and network deliveries can suppress one
    /// another.
    fn return_strategy(&self) -> ReturnStrategy {
        ReturnStrategy::default()
    }

    /// Whether the write-behind put for this request's response should be
    /// instant rather than deferred.
    fn should_cache_instantly(&self) -> bool {
        false
    }

    /// Whether this request's body is a memory-heavy kind (e.g. an image)
    /// that must be parsed under the global parse mutex.
    fn is_memory_heavy(&self) -> bool {
        false
    }

    /// Overrides the server-declared hard TTL (epoch ms), if set.
    fn ttl_override_ms(&self) -> Option<i64> {
        None
    }

    /// Overrides the server-declared soft TTL (epoch ms), if set.
    fn soft_ttl_override_ms(&self) -> Option<i64> {
        None
    }

    /// Parses a network response into a delivered value plus an optional
    /// cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the body cannot be parsed.
    fn parse_network_response(&self, response: &NetworkResponse) -> Result<ParsedResponse, ParseError>;

    /// Refines a transport-level error into the error ultimately delivered
    /// to the error listener. The default passes the error through
    /// unchanged (via `RequestError::from`).
    fn parse_network_error(&self, error: &NetworkError) -> crate::error::RequestError {
        crate::error::RequestError::from(error)
    }

    /// Delivers a successful result to this request's listener.
    fn deliver_response(&self, value: std::sync::Arc<dyn std::any::Any + Send + Sync>);

    /// Delivers an error to this request's error listener.
    fn deliver_error(&self, error: crate::error::RequestError);
}
