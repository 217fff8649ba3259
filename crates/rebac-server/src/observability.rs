//! Structured logging setup.
//!
//! `init_logging` installs a global `tracing-subscriber` with either JSON or
//! text output. `RUST_LOG` takes precedence over the configured level.
//!
//! ```ignore
//! use rebac_server::config::LoggingConfig;
//! use rebac_server::observability::init_logging;
//!
//! init_logging(&LoggingConfig { level: "debug".into(), json: true });
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Filter from `RUST_LOG`, or the configured level when unset or invalid.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()))
}

/// Installs the global subscriber.
///
/// Returns false when a global subscriber was already installed, in which
/// case the existing one stays in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = build_filter(config);

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    installed.is_ok()
}

/// A JSON subscriber writing to `writer`, for capturing logs in tests.
pub fn json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(EnvFilter::new("trace")).with(
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true),
    )
}
