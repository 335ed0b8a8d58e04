//! # Service Configuration
//!
//! Every setting is a command line flag backed by an environment variable,
//! so the service runs unchanged from a shell or a container platform.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use thiserror::Error;

use crate::store::PostgresConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is required when STORE=postgres")]
    MissingDatabaseUrl,

    #[error("invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),

    #[error("REQUEST_TIMEOUT_SECS must be greater than zero")]
    ZeroRequestTimeout,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Dev,
    Prd,
    Stg,
    Uat,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prd => "prd",
            Environment::Stg => "stg",
            Environment::Uat => "uat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// Platform the process runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    CloudRun,
    AppEngine,
    Localhost,
}

impl RuntimeKind {
    pub fn detect() -> Self {
        Self::detect_with(|name| std::env::var(name).ok())
    }

    /// Detects the runtime from an environment lookup
    pub fn detect_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).map_or(false, |v| !v.is_empty());
        if set("K_SERVICE") {
            RuntimeKind::CloudRun
        } else if set("GAE_APPLICATION") || set("GAE_SERVICE") {
            RuntimeKind::AppEngine
        } else {
            RuntimeKind::Localhost
        }
    }

    pub fn is_cloud(&self) -> bool {
        !matches!(self, RuntimeKind::Localhost)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::CloudRun => "cloud-run",
            RuntimeKind::AppEngine => "app-engine",
            RuntimeKind::Localhost => "localhost",
        }
    }
}

/// Settings shared by every command
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Deployment environment
    #[arg(long = "env", env = "ENV", value_enum)]
    pub environment: Environment,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Answer every request except health checks with 503
    #[arg(long, env = "MAINTENANCE_MODE")]
    pub maintenance_mode: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Persistence backend
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Postgres)]
    pub store: StoreKind,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Project id; GOOGLE_CLOUD_PROJECT is used when unset
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "GCP_PROJECT_NUMBER")]
    pub project_number: Option<String>,

    #[arg(long, env = "LOCATION", default_value = "us-central1")]
    pub location: String,

    /// Directory with JSON schemas overriding the embedded ones
    #[arg(long, env = "SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,

    /// Per-request deadline
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins, comma separated; any origin when empty
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "BUILD_DATE", default_value = "")]
    pub build_date: String,

    #[arg(long, env = "BUILD_NUMBER", default_value = "")]
    pub build_number: String,

    #[arg(long, env = "COMMIT_ID", default_value = "")]
    pub commit_id: String,
}

impl ServiceConfig {
    /// Checks settings that depend on each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store == StoreKind::Postgres && self.database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if let Some(origin) = self
            .cors_origins
            .iter()
            .find(|o| axum::http::HeaderValue::from_str(o).is_err())
        {
            return Err(ConfigError::InvalidCorsOrigin(origin.clone()));
        }
        Ok(())
    }

    pub fn project_id(&self) -> Option<String> {
        self.project_id
            .clone()
            .or_else(|| std::env::var("GOOGLE_CLOUD_PROJECT").ok())
            .filter(|p| !p.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn postgres_config(&self) -> Result<PostgresConfig, ConfigError> {
        let database_url = self
            .database_url
            .clone()
            .ok_or(ConfigError::MissingDatabaseUrl)?;
        Ok(PostgresConfig {
            database_url,
            max_connections: self.database_max_connections,
            query_timeout_secs: self.request_timeout_secs,
            ..PostgresConfig::default()
        })
    }
}
