//! Tracing subscriber setup.
//!
//! The orchestrator itself only emits `tracing` events; installing a
//! subscriber is the application's choice. This module offers the stack used
//! by the examples and tests: env-filtered fmt output plus span-trace capture
//! for error reports.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the default subscriber, honoring `RUST_LOG`.
///
/// Returns an error when a global subscriber is already set; use
/// [`init`] to ignore that case.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init()
}

/// Install the default subscriber, ignoring an already-installed one.
pub fn init() {
    let _ = try_init();
}
