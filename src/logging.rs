//! Tracing setup for hosts and tests.

use tracing_subscriber::EnvFilter;

/// Install a process-wide fmt subscriber filtered by `RUST_LOG`, falling
/// back to `default_directive` when the variable is unset or invalid.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
