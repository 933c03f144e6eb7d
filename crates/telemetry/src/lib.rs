//! Structured logging setup, shared by every crate that instruments its
//! operations with `tracing`.

#![deny(unsafe_code)]

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Install a JSON-formatted `tracing` subscriber with env-filter support
/// (`RUST_LOG`, defaulting to `info`).
///
/// Call once, near the start of a host binary or test harness. Safe to call
/// more than once: later calls are no-ops rather than panics.
pub fn init() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
