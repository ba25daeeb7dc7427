//! Tracing setup for the director daemon.
//!
//! The RUST_LOG environment variable always wins. Without it the level
//! defaults to info; when transport tracing is enabled the netlink-facing
//! crates are raised to debug, since the raw frame dumps the transport
//! emits would otherwise be filtered out.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter applied when RUST_LOG is unset.
fn default_filter(trace_transport: bool) -> EnvFilter {
    if trace_transport {
        EnvFilter::new("info,ipvs=debug,director=debug")
    } else {
        EnvFilter::new("info")
    }
}

/// Initialize tracing for the daemon.
///
/// `trace_transport` mirrors the config's `debug` flag and widens the
/// default filter so netlink frame dumps become visible.
pub fn init(trace_transport: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(trace_transport)),
        )
        .init();
}

/// Initialize tracing with JSON formatting (for log collectors).
pub fn init_json(trace_transport: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(trace_transport)),
        )
        .init();
}
