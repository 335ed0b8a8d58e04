//! # Observability
//!
//! Logging setup and log-safe rendering of request bodies.
//!
//! All diagnostics go through `tracing`. Cloud runtimes get one JSON object
//! per line; local runs get the human-readable formatter.

mod redaction;

pub use redaction::{redact_body, redact_value, REDACTED};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Builds the filter: `RUST_LOG` when set, else `debug` or `info`.
pub fn env_filter(debug: bool) -> Result<EnvFilter, ObservabilityError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| ObservabilityError::InvalidFilter(e.to_string())),
        _ => Ok(EnvFilter::new(if debug { "debug" } else { "info" })),
    }
}

/// Installs the global subscriber
pub fn init_tracing(format: LogFormat, debug: bool) -> Result<(), ObservabilityError> {
    let filter = env_filter(debug)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| ObservabilityError::AlreadyInstalled(e.to_string()))
}
