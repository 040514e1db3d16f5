/*!
Logging setup for the feature tiler binary.

With the `profiling` feature, `profiling::scope!` markers in the library turn
into tracing spans and show up in the same output.
*/

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize logging with sensible defaults.
///
/// If RUST_LOG is not set, debug builds default to DEBUG and release builds
/// to INFO.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }

    let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
    let registry = tracing_subscriber::registry().with(fmt_layer);
    if registry.try_init().is_err() {
        tracing::warn!("A global subscriber was already installed, keeping it");
        return;
    }

    if cfg!(feature = "profiling") {
        tracing::info!("Logging initialized (profiling spans enabled)");
    } else {
        tracing::info!("Logging initialized");
    }
}
