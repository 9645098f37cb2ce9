//! Subscriber setup for the `tracing` events emitted by the store, the
//! planner and the task pool.
//!
//! Only available with the `logging` feature; without it every function is a
//! no-op so callers do not need their own `cfg` gates.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Installs a `fmt` subscriber with `level` as the fallback filter when
/// `RUST_LOG` is unset. A subscriber that is already installed is kept.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

/// Debug-level output routed through the test harness writer.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("stashdb=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
