//! Centralized logging setup
//!
//! The router logs through `tracing`; embedding applications that bring
//! their own subscriber can skip this module entirely.

use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize logging to stdout
///
/// The log level is taken from the `RUST_LOG` environment variable and
/// defaults to "info" if unset.
pub fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter),
        )
        .init();
}

/// Initialize logging for tests; safe to call more than once
///
/// Returns quietly if a subscriber is already installed.
pub fn init_test_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_filter(env_filter),
        )
        .try_init();
}
