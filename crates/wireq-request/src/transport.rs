//! crates/wireq-request/src/transport.rs
//!
//! The HTTP transport contract. Implementing an actual HTTP stack is out
//! of scope for this workspace; this module only defines the shape a
//! transport adapter must present to the network dispatcher pool.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

/// The result of one transport round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body bytes.
    pub body: Vec<u8>,
    /// Response headers, in server order.
    pub headers: HashMap<String, String>,
    /// Whether the server replied 304 Not Modified.
    pub not_modified: bool,
}

/// Failure kinds a transport can report. Each carries the partial response
/// it managed to read (if any) and the latency spent before failing.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Authentication was rejected (401/403-class failure).
    #[error("authentication failed")]
    AuthFailure {
        /// Partial response, if the server returned one before failing.
        response: Option<NetworkResponse>,
        /// Time spent before the failure was observed.
        latency: Option<Duration>,
    },
    /// A connection could not be established at all.
    #[error("no connection")]
    NoConnection {
        /// Time spent before giving up.
        latency: Option<Duration>,
    },
    /// A generic network-layer failure (reset, DNS, etc).
    #[error("network error")]
    Network {
        /// Partial response, if any.
        response: Option<NetworkResponse>,
        /// Time spent before the failure was observed.
        latency: Option<Duration>,
    },
    /// The transport gave up waiting for a response.
    #[error("timeout")]
    Timeout {
        /// Time spent before timing out.
        latency: Option<Duration>,
    },
    /// The server itself reported an error status (5xx/4xx).
    #[error("server error: {status}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// The response the server actually sent.
        response: Option<NetworkResponse>,
        /// Time spent before the response arrived.
        latency: Option<Duration>,
    },
}

impl NetworkError {
    /// Returns the partial response carried by this error, if any.
    #[must_use]
    pub fn response(&self) -> Option<&NetworkResponse> {
        match self {
            NetworkError::AuthFailure { response, .. }
            | NetworkError::Network { response, .. }
            | NetworkError::ServerError { response, .. } => response.as_ref(),
            NetworkError::NoConnection { .. } | NetworkError::Timeout { .. } => None,
        }
    }

    /// Returns the latency observed before this error, if any.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        match self {
            NetworkError::AuthFailure { latency, .. }
            | NetworkError::NoConnection { latency }
            | NetworkError::Network { latency, .. }
            | NetworkError::Timeout { latency }
            | NetworkError::ServerError { latency, .. } => *latency,
        }
    }
}

/// Performs one request/response round-trip. Implemented by an external
/// HTTP stack adapter; this workspace never opens a socket itself.
pub trait Transport: Send + Sync {
    /// Performs `method url` with the given headers and body, returning the
    /// raw response or a transport-level error. `retry` is this request's
    /// retry policy: an adapter that retries internally on a retryable
    /// failure (timeout, connection reset) calls
    /// [`RetryPolicy::record_retry`] once per retry so the policy's
    /// timeout/backoff/attempt-budget state reflects what actually
    /// happened on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] on any transport failure.
    fn perform_request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
        retry: &RetryPolicy,
    ) -> Result<NetworkResponse, NetworkError>;
}

/// Maps a generic I/O failure to the closest [`NetworkError`] variant, for
/// transport adapters built on top of a blocking I/O stack. Not used by
/// anything in this workspace directly (no transport is implemented here),
/// but kept alongside the trait it serves so adapters don't each reinvent
/// the same classification.
#[must_use]
pub fn map_io_error(error: &io::Error, latency: Option<Duration>) -> NetworkError {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => NetworkError::Timeout { latency },
        ErrorKind::ConnectionRefused | ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
            NetworkError::NoConnection { latency }
        }
        _ => NetworkError::Network { response: None, latency },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_io_error_maps_to_timeout() {
        let err = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(map_io_error(&err, None), NetworkError::Timeout { .. }));
    }

    #[test]
    fn connection_refused_maps_to_no_connection() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(map_io_error(&err, None), NetworkError::NoConnection { .. }));
    }

    #[test]
    fn other_io_errors_map_to_generic_network_error() {
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(matches!(map_io_error(&err, None), NetworkError::Network { .. }));
    }
}
