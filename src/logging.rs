//! Structured logging setup. The host daemon may install its own
//! subscriber; [`init`] is provided for standalone use (tests, the
//! round-trip fixtures, and any embedder that hasn't set one up yet) and is
//! a no-op if a subscriber is already installed.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber at `info` by default, overridable via
/// `RUST_LOG`, matching the filter-by-module convention the rest of the
/// host daemon uses for its own logging.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
