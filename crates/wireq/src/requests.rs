//! crates/wireq/src/requests.rs
//!
//! Two ready-made [`Request`] implementations covering the common body
//! kinds: a plain UTF-8 [`StringRequest`] and a [`JsonRequest<T>`] that
//! deserializes via `serde`. Both derive their cache policy from response
//! headers via [`crate::freshness::from_headers`] rather than hand-rolling
//! freshness math per request kind.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use wireq_cache::{Clock, SystemClock};
use wireq_request::transport::NetworkResponse;
use wireq_request::{FetchOrder, ParseError, ParsedResponse, Priority, Request, RequestError, ReturnStrategy};

use crate::freshness::{self, CachePolicy};

fn cache_header_for(
    key: &str,
    response: &NetworkResponse,
    clock: &dyn Clock,
    ttl_override_ms: Option<i64>,
    soft_ttl_override_ms: Option<i64>,
) -> Option<wireq_codec::CacheHeader> {
    let policy = freshness::from_headers(&response.headers, clock.now_ms(), ttl_override_ms, soft_ttl_override_ms);
    match policy {
        CachePolicy::Cacheable { ttl, soft_ttl, etag } => Some(freshness::cache_header(
            key,
            ttl,
            soft_ttl,
            etag,
            clock.now_ms(),
            ttl,
            false,
            response.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        CachePolicy::Uncacheable => None,
    }
}

/// A GET-or-otherwise request whose body is delivered as a plain UTF-8
/// `String`. Malformed UTF-8 is replaced lossily rather than failing the
/// request, matching how a browser's text decoder behaves.
pub struct StringRequest {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    priority: Priority,
    fetch_order: FetchOrder,
    should_cache: bool,
    offline_cache: bool,
    return_strategy: ReturnStrategy,
    ttl_override_ms: Option<i64>,
    soft_ttl_override_ms: Option<i64>,
    clock: Arc<dyn Clock>,
    on_response: Box<dyn Fn(&str) + Send + Sync>,
    on_error: Box<dyn Fn(&RequestError) + Send + Sync>,
}

impl StringRequest {
    /// Creates a GET `StringRequest` for `url` with default policy
    /// (normal priority, FIFO, cacheable, double-delivery).
    #[must_use]
    pub fn get(
        url: impl Into<String>,
        on_response: impl Fn(&str) + Send + Sync + 'static,
        on_error: impl Fn(&RequestError) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            method: "GET".to_owned(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            priority: Priority::default(),
            fetch_order: FetchOrder::default(),
            should_cache: true,
            offline_cache: false,
            return_strategy: ReturnStrategy::default(),
            ttl_override_ms: None,
            soft_ttl_override_ms: None,
            clock: Arc::new(SystemClock),
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
        })
    }

    /// Overrides the declared priority.
    #[must_use]
    pub fn with_priority(mut self: Arc<Self>, priority: Priority) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").priority = priority;
        self
    }

    /// Overrides the return strategy.
    #[must_use]
    pub fn with_return_strategy(mut self: Arc<Self>, strategy: ReturnStrategy) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").return_strategy = strategy;
        self
    }

    /// Overrides the request-level TTL (epoch ms), bypassing the server's
    /// own freshness headers.
    #[must_use]
    pub fn with_ttl_override_ms(mut self: Arc<Self>, ttl_ms: i64) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").ttl_override_ms = Some(ttl_ms);
        self
    }

    /// Supplies a clock for freshness computation other than the real wall
    /// clock (for deterministic tests).
    #[must_use]
    pub fn with_clock(mut self: Arc<Self>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").clock = clock;
        self
    }
}

impl Request for StringRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    fn body(&self) -> Option<Vec<u8>> {
        self.body.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn fetch_order(&self) -> FetchOrder {
        self.fetch_order
    }

    fn should_cache(&self) -> bool {
        self.should_cache
    }

    fn offline_cache(&self) -> bool {
        self.offline_cache
    }

    fn return_strategy(&self) -> ReturnStrategy {
        self.return_strategy
    }

    fn ttl_override_ms(&self) -> Option<i64> {
        self.ttl_override_ms
    }

    fn soft_ttl_override_ms(&self) -> Option<i64> {
        self.soft_ttl_override_ms
    }

    fn parse_network_response(&self, response: &NetworkResponse) -> Result<ParsedResponse, ParseError> {
        let text = String::from_utf8_lossy(&response.body).into_owned();
        let cache_header = cache_header_for(&self.cache_key(), response, self.clock.as_ref(), self.ttl_override_ms, self.soft_ttl_override_ms);
        Ok(match cache_header {
            Some(header) => ParsedResponse::cacheable(text, header),
            None => ParsedResponse::uncacheable(text),
        })
    }

    fn deliver_response(&self, value: Arc<dyn std::any::Any + Send + Sync>) {
        if let Some(text) = value.downcast_ref::<String>() {
            (self.on_response)(text);
        }
    }

    fn deliver_error(&self, error: RequestError) {
        (self.on_error)(&error);
    }
}

/// A request whose body is deserialized as JSON into `T` via `serde`.
pub struct JsonRequest<T> {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    priority: Priority,
    fetch_order: FetchOrder,
    should_cache: bool,
    offline_cache: bool,
    return_strategy: ReturnStrategy,
    ttl_override_ms: Option<i64>,
    soft_ttl_override_ms: Option<i64>,
    clock: Arc<dyn Clock>,
    on_response: Box<dyn Fn(&T) + Send + Sync>,
    on_error: Box<dyn Fn(&RequestError) + Send + Sync>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + Sync + 'static> JsonRequest<T> {
    /// Creates a GET `JsonRequest<T>` for `url`.
    #[must_use]
    pub fn get(
        url: impl Into<String>,
        on_response: impl Fn(&T) + Send + Sync + 'static,
        on_error: impl Fn(&RequestError) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            method: "GET".to_owned(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            priority: Priority::default(),
            fetch_order: FetchOrder::default(),
            should_cache: true,
            offline_cache: false,
            return_strategy: ReturnStrategy::default(),
            ttl_override_ms: None,
            soft_ttl_override_ms: None,
            clock: Arc::new(SystemClock),
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
            _marker: PhantomData,
        })
    }

    /// Overrides the declared priority.
    #[must_use]
    pub fn with_priority(mut self: Arc<Self>, priority: Priority) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").priority = priority;
        self
    }

    /// Overrides the return strategy.
    #[must_use]
    pub fn with_return_strategy(mut self: Arc<Self>, strategy: ReturnStrategy) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").return_strategy = strategy;
        self
    }

    /// Supplies a clock for freshness computation other than the real wall
    /// clock (for deterministic tests).
    #[must_use]
    pub fn with_clock(mut self: Arc<Self>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("request not yet shared").clock = clock;
        self
    }
}

impl<T: DeserializeOwned + Send + Sync + 'static> Request for JsonRequest<T> {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    fn body(&self) -> Option<Vec<u8>> {
        self.body.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn fetch_order(&self) -> FetchOrder {
        self.fetch_order
    }

    fn should_cache(&self) -> bool {
        self.should_cache
    }

    fn offline_cache(&self) -> bool {
        self.offline_cache
    }

    fn return_strategy(&self) -> ReturnStrategy {
        self.return_strategy
    }

    fn ttl_override_ms(&self) -> Option<i64> {
        self.ttl_override_ms
    }

    fn soft_ttl_override_ms(&self) -> Option<i64> {
        self.soft_ttl_override_ms
    }

    fn parse_network_response(&self, response: &NetworkResponse) -> Result<ParsedResponse, ParseError> {
        let value: T = serde_json::from_slice(&response.body).map_err(|err| ParseError::from_source("invalid json body", err))?;
        let cache_header = cache_header_for(&self.cache_key(), response, self.clock.as_ref(), self.ttl_override_ms, self.soft_ttl_override_ms);
        Ok(match cache_header {
            Some(header) => ParsedResponse::cacheable(value, header),
            None => ParsedResponse::uncacheable(value),
        })
    }

    fn deliver_response(&self, value: Arc<dyn std::any::Any + Send + Sync>) {
        if let Some(value) = value.downcast_ref::<T>() {
            (self.on_response)(value);
        }
    }

    fn deliver_error(&self, error: RequestError) {
        (self.on_error)(&error);
    }
}
