//! crates/wireq-request/src/parse.rs
//!
//! The body-parser contract: `parse_network_response`,
//! `parse_network_error`, plus the value each produces.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;
use wireq_codec::CacheHeader;

/// Failure produced while parsing a response body.
#[derive(Debug, Error)]
#[error("failed to parse response body: {message}")]
pub struct ParseError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ParseError {
    /// Creates a parse error with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a parse error wrapping an underlying cause.
    pub fn from_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// The outcome of successfully parsing a network response body.
pub struct ParsedResponse {
    /// The parsed domain value, type-erased so heterogeneous request kinds
    /// can be dispatched uniformly. `Arc` (not `Box`) because a joined
    /// request's waiters share the same delivered value.
    pub value: Arc<dyn Any + Send + Sync>,
    /// Cache metadata to persist alongside the response body, if this
    /// response is cacheable. `None` means "do not cache this response"
    /// even if the request otherwise allows caching.
    pub cache_header: Option<CacheHeader>,
}

impl ParsedResponse {
    /// Creates a parsed response with no cache entry.
    pub fn uncacheable<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            cache_header: None,
        }
    }

    /// Creates a parsed response paired with a cache entry to persist.
    pub fn cacheable<T: Send + Sync + 'static>(value: T, cache_header: CacheHeader) -> Self {
        Self {
            value: Arc::new(value),
            cache_header: Some(cache_header),
        }
    }
}
