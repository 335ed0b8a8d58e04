//! HTTP Server Configuration
//!
//! Bind address, CORS origins and the switches read by the middleware stack.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{RuntimeKind, ServiceConfig};
use crate::request::DEFAULT_REQUEST_TIMEOUT;

/// Build identity reported by the health check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_date: String,
    pub build_number: String,
    pub commit_id: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins; any origin when empty
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub maintenance_mode: bool,

    /// Redirect plain HTTP to HTTPS, judged by `X-Forwarded-Proto`
    #[serde(default)]
    pub enforce_https: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Environment name reported by the health check
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub build: BuildInfo,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            maintenance_mode: false,
            enforce_https: false,
            request_timeout: default_request_timeout(),
            environment: default_environment(),
            build: BuildInfo::default(),
        }
    }
}

impl HttpServerConfig {
    /// Create a new config with specified port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Derives the server settings from the service settings
    pub fn from_service(config: &ServiceConfig, runtime: RuntimeKind) -> Self {
        Self {
            host: default_host(),
            port: config.port,
            cors_origins: config.cors_origins.clone(),
            maintenance_mode: config.maintenance_mode,
            enforce_https: runtime.is_cloud(),
            request_timeout: config.request_timeout(),
            environment: config.environment.as_str().to_string(),
            build: BuildInfo {
                build_date: config.build_date.clone(),
                build_number: config.build_number.clone(),
                commit_id: config.commit_id.clone(),
            },
        }
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
