//! Logging initialisation and span helpers.
//!
//! Structured logging with consistent spans across the deployer and the
//! world sync loop.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Reads the format from `HERALD_LOG_FORMAT` (`json` or anything else).
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("HERALD_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `herald_bridge=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one `deploy_entity` call.
#[must_use]
pub fn deploy_span(entity_id: &str, entity_type: &str) -> Span {
    tracing::info_span!("deploy", entity_id = entity_id, entity_type = entity_type)
}

/// Creates a span for one world sync iteration.
#[must_use]
pub fn world_sync_span(iteration: u64) -> Span {
    tracing::info_span!("world_sync", iteration = iteration)
}
