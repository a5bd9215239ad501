//! # Structured Logging Module
//!
//! Environment-aware tracing initialization for the sequencer and its
//! embedding application.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Reads `FOLLOWUP_LOG` (falling back to `RUST_LOG`, then `info`) for the
/// filter and `FOLLOWUP_LOG_FORMAT=json` for machine-readable output. Safe to
/// call more than once; only the first call installs a subscriber, and an
/// already-installed global subscriber (e.g. in tests) is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("FOLLOWUP_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let json_output = std::env::var("FOLLOWUP_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry();
        let result = if json_output {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(EnvFilter::new(filter)),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(EnvFilter::new(filter)),
                )
                .try_init()
        };

        // A subscriber installed by the host application wins
        if result.is_err() {
            tracing::debug!("Tracing subscriber already installed; keeping it");
        }
    });
}
