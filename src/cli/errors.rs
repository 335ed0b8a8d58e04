//! CLI-specific error types
//!
//! Every CLI error stops the process.

use thiserror::Error;

use crate::config::ConfigError;
use crate::http_server::ServerError;
use crate::observability::ObservabilityError;
use crate::schema::SchemaError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] ObservabilityError),

    #[error("schemas: {0}")]
    Schema(#[from] SchemaError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("server: {0}")]
    Server(#[from] ServerError),
}

impl CliError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CAR_SVC_CLI_CONFIG_ERROR",
            CliError::Logging(_) => "CAR_SVC_CLI_LOGGING_ERROR",
            CliError::Schema(_) => "CAR_SVC_CLI_SCHEMA_ERROR",
            CliError::Store(_) => "CAR_SVC_CLI_STORE_ERROR",
            CliError::Server(_) => "CAR_SVC_CLI_SERVER_ERROR",
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
