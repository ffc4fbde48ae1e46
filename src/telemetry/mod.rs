//! Tracing/subscriber bootstrap.
//!
//! Wires `tracing_subscriber::registry()` with an `EnvFilter`, an ANSI
//! `fmt` layer, and `tracing_error::ErrorLayer` so `miette` can capture
//! spantraces.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (`try_init` swallows the already-set error).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,rollback_agent=info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}
