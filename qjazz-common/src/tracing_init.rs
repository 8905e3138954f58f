//! Process-wide tracing subscriber setup, mirroring the teacher's
//! `init_tracing_with_default_env_filter`: a single call at the top of each
//! binary's `main()`, `RUST_LOG`-aware, falling back to the configured level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::TracingConfig;

/// Initializes the global tracing subscriber. Safe to call at most once per
/// process; later calls are silently ignored (mirrors typical `main()` usage
/// where tests also reach this through a shared harness).
pub fn init_tracing_with_default_env_filter(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
