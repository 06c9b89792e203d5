//! crates/wireq-logging/src/lib.rs
//!
//! Thin `tracing-subscriber` wiring: every dispatcher, the cache, and the
//! write-behind worker emit `tracing` events directly rather than taking a
//! logger dependency of their own, so this crate only has to install one
//! global subscriber for all of it to show up.

#![deny(unsafe_code)]

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber that writes to stderr, filtered
/// by `filter` (an `EnvFilter` directive string, e.g. `"wireq=debug,warn"`).
///
/// Safe to call more than once: the global default can only be set once
/// per process, so later calls are silently ignored rather than panicking.
pub fn init_tracing(filter: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// As [`init_tracing`], but reads the filter from the `RUST_LOG`
/// environment variable, defaulting to `"info"` if it's unset or invalid.
pub fn init_tracing_from_env() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
