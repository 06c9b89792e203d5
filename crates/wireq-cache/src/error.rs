//! crates/wireq-cache/src/error.rs
//!
//! Internal-only error surface. Nothing in this enum ever reaches a
//! request's error listener: every public [`crate::DiskCache`] method that
//! can fail degrades the failure into a miss or a logged best-effort
//! cleanup instead of propagating it.

use thiserror::Error;

/// Internal cache failure. Never surfaced to callers outside this crate;
/// `DiskCache`'s public API converts every variant into a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk record was corrupt or carried the reserved sentinel.
    #[error("corrupt record: {0}")]
    Codec(#[from] wireq_codec::CodecError),
    /// A record was read back with a different key than requested,
    /// meaning two distinct keys hashed to the same filename.
    #[error("filename collision: expected key {expected:?}, found {found:?}")]
    KeyMismatch {
        /// The key the caller asked for.
        expected: String,
        /// The key actually stored in the colliding file.
        found: String,
    },
}
