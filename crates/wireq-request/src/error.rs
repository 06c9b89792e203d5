//! crates/wireq-request/src/error.rs
//!
//! The error surface delivered to a request's error listener. Distinct
//! from `wireq_cache::CacheError` and `wireq_codec::CodecError`, which are
//! internal and never reach this type.

use std::time::Duration;

use thiserror::Error;

use crate::transport::NetworkError;

/// Error delivered to a request's error listener.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Authentication was rejected.
    #[error("authentication failed")]
    AuthFailure {
        /// HTTP status code, if the server supplied one.
        status: Option<u16>,
        /// Network latency observed before failing.
        latency: Option<Duration>,
    },
    /// No connection could be established.
    #[error("no connection")]
    NoConnection {
        /// Network latency observed before giving up.
        latency: Option<Duration>,
    },
    /// A generic network-layer failure.
    #[error("network error")]
    Network {
        /// HTTP status code, if known.
        status: Option<u16>,
        /// Network latency observed before failing.
        latency: Option<Duration>,
    },
    /// The transport gave up waiting for a response.
    #[error("timeout")]
    Timeout {
        /// Network latency observed before timing out.
        latency: Option<Duration>,
    },
    /// The server reported an error status.
    #[error("server error: {status}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Network latency observed before the response arrived.
        latency: Option<Duration>,
    },
    /// The response body could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<&NetworkError> for RequestError {
    fn from(err: &NetworkError) -> Self {
        match err {
            NetworkError::AuthFailure { response, latency } => RequestError::AuthFailure {
                status: response.as_ref().map(|r| r.status),
                latency: *latency,
            },
            NetworkError::NoConnection { latency } => RequestError::NoConnection { latency: *latency },
            NetworkError::Network { response, latency } => RequestError::Network {
                status: response.as_ref().map(|r| r.status),
                latency: *latency,
            },
            NetworkError::Timeout { latency } => RequestError::Timeout { latency: *latency },
            NetworkError::ServerError { status, latency, .. } => RequestError::ServerError {
                status: *status,
                latency: *latency,
            },
        }
    }
}

impl From<crate::parse::ParseError> for RequestError {
    fn from(err: crate::parse::ParseError) -> Self {
        RequestError::Parse(err.to_string())
    }
}
