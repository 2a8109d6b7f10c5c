//! Logging bootstrap.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is the
//! embedding application's job. This helper covers the common case: a formatted
//! subscriber filtered by `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Installs a global formatted `tracing` subscriber. Safe to call more than
/// once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
