//! # HTTP Server
//!
//! Combines the car and health routers, wraps them in the middleware stack
//! and serves until a shutdown signal arrives.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue};
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use super::health::health_routes;
use super::middleware::{
    access_log, compression_layer, correlation_id, cors_layer, enforce_https, maintenance,
    panic_response, request_context,
};
use super::routes::car_routes;
use super::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("http server i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the car service
pub struct HttpServer {
    state: AppState,
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { state, router }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.state.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serves until SIGINT or SIGTERM, then closes the store
    pub async fn start(self) -> Result<(), ServerError> {
        let addr_text = self.socket_addr();
        let addr: SocketAddr = addr_text
            .parse()
            .map_err(|source| ServerError::InvalidAddress {
                addr: addr_text.clone(),
                source,
            })?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            %addr,
            store = self.state.store.backend(),
            maintenance_mode = self.state.config.maintenance_mode,
            "car-svc listening"
        );

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.state.store.close().await;
        info!("car-svc shutdown complete");
        served.map_err(ServerError::from)
    }
}

/// Builds the full router with its middleware stack
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // ServiceBuilder applies layers top to bottom, outermost first
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(correlation_id))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn_with_state(config.clone(), maintenance))
        .layer(axum::middleware::from_fn_with_state(config.clone(), enforce_https))
        .layer(axum::middleware::from_fn_with_state(config.clone(), request_context))
        .layer(axum::middleware::from_fn(access_log))
        .layer(cors_layer(&config.cors_origins))
        .layer(compression_layer())
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ));

    Router::new()
        .merge(health_routes(state.clone()))
        .merge(car_routes(state))
        .layer(middleware)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, draining"),
        _ = terminate => info!("received SIGTERM, draining"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http_server::HttpServerConfig;
    use crate::schema::{SchemaLoader, SchemaValidator};
    use crate::store::MemoryCarStore;

    fn state(config: HttpServerConfig) -> AppState {
        let validator = SchemaValidator::new(SchemaLoader::embedded().unwrap());
        AppState::new(MemoryCarStore::new_shared(), Arc::new(validator), config)
    }

    #[test]
    fn test_server_with_custom_port() {
        let server = HttpServer::new(state(HttpServerConfig::with_port(9090)));
        assert_eq!(server.socket_addr(), "0.0.0.0:9090");
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let config = HttpServerConfig {
            host: "not an address".to_string(),
            ..HttpServerConfig::default()
        };
        let err = HttpServer::new(state(config)).start().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
    }
}
