//! Log subscriber setup for binaries and tests embedding the engine.
//!
//! The library itself only emits `tracing` events; nothing is printed until
//! the host installs a subscriber, for example with [`init_tracing`].

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable fmt subscriber filtered by `RUST_LOG`.
///
/// Idempotent. Does nothing if another global subscriber is already set.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    });
}

/// Install a JSON-lines subscriber filtered by `RUST_LOG`.
///
/// Idempotent. Does nothing if another global subscriber is already set.
pub fn init_json_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .try_init();
    });
}

/// Install a subscriber with an explicit filter directive, e.g.
/// `"adk_retrieval=debug"`.
pub fn init_tracing_with_filter(filter: &str) {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    });
}
