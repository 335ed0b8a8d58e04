//! Middleware stack
//!
//! Outermost first:
//!
//! 1. correlation id, stamped on every response
//! 2. panic recovery (500 without a body)
//! 3. maintenance mode (503 except the health check)
//! 4. HTTPS enforcement behind a TLS-terminating proxy
//! 5. request context: ids, test flags, location headers, deadline
//! 6. access log
//! 7. CORS
//! 8. gzip for JSON bodies
//! 9. no-cache headers

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Response, StatusCode, Version};
use axum::middleware::Next;
use axum::response::IntoResponse;
use tower_http::compression::predicate::{Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::request::{
    RequestContext, X_LC_CORRELATION_ID, X_LC_LOCATION_PREFIX, X_LC_SVC_TEST, X_REQUEST_ID,
};

use super::config::HttpServerConfig;
use super::health::is_health_check;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Bodies shorter than this are sent uncompressed
const MIN_COMPRESS_SIZE: u16 = 32;

/// Resolves the correlation id before any other layer can answer. A
/// generated id is written back to the request so the request context
/// picks up the same value.
pub async fn correlation_id(mut request: Request, next: Next) -> Response<Body> {
    let headers = request.headers_mut();
    let id = match header_value(headers, X_LC_CORRELATION_ID).or_else(|| header_value(headers, X_REQUEST_ID)) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            put(headers, X_REQUEST_ID, &id);
            put(headers, X_LC_CORRELATION_ID, &id);
            id
        }
    };

    let mut response = next.run(request).await;
    put(response.headers_mut(), X_LC_CORRELATION_ID, &id);
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Converts a handler panic into a bare 500
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

pub async fn maintenance(
    State(config): State<Arc<HttpServerConfig>>,
    request: Request,
    next: Next,
) -> Response<Body> {
    if config.maintenance_mode && !is_health_check(request.uri()) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    next.run(request).await
}

/// Redirects plain HTTP with 308 when the proxy reports it
pub async fn enforce_https(
    State(config): State<Arc<HttpServerConfig>>,
    request: Request,
    next: Next,
) -> Response<Body> {
    if !config.enforce_https || is_health_check(request.uri()) {
        return next.run(request).await;
    }
    let proto = request
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());
    if proto.as_deref() != Some("http") {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |p| p.as_str());
    match HeaderValue::from_str(&format!("https://{host}{path}")) {
        Ok(location) if !host.is_empty() => {
            (StatusCode::PERMANENT_REDIRECT, [(header::LOCATION, location)]).into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Builds the [`RequestContext`] and echoes its ids on the response
pub async fn request_context(
    State(config): State<Arc<HttpServerConfig>>,
    mut request: Request,
    next: Next,
) -> Response<Body> {
    let context = RequestContext::from_headers(request.headers(), config.request_timeout);
    request.extensions_mut().insert(context.clone());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    put(headers, X_REQUEST_ID, &context.request_id);
    put(headers, X_LC_CORRELATION_ID, &context.correlation_id);
    for (suffix, value) in &context.location {
        put(headers, &format!("{X_LC_LOCATION_PREFIX}{suffix}"), value);
    }
    if context.test {
        put(headers, X_LC_SVC_TEST, "true");
    }
    response
}

fn put(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

pub async fn access_log(request: Request, next: Next) -> Response<Body> {
    if is_health_check(request.uri()) {
        return next.run(request).await;
    }
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let context = request.extensions().get::<RequestContext>().cloned();
    let started = Instant::now();

    let response = next.run(request).await;

    let (correlation_id, caller_id, test) = context
        .map(|c| (c.correlation_id, c.caller_id.unwrap_or_default(), c.test))
        .unwrap_or_default();
    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        correlation_id = %correlation_id,
        caller_id = %caller_id,
        test,
        "request served"
    );
    response
}

/// Any origin when none are configured
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|s| s.parse().ok()))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin)
        .expose_headers(AnyOrigin)
}

fn is_json(_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("application/json"))
}

pub fn compression_layer() -> CompressionLayer<impl Predicate> {
    CompressionLayer::new()
        .gzip(true)
        .compress_when(SizeAbove::new(MIN_COMPRESS_SIZE).and(is_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_response_is_bare_500() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = panic_response(Box::new(String::from("boom")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_json_predicate() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(StatusCode::OK, Version::HTTP_11, &headers, &Extensions::new()));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(is_json(StatusCode::OK, Version::HTTP_11, &headers, &Extensions::new()));
    }

    #[tokio::test]
    async fn test_correlation_id_reaches_panic_responses() {
        use axum::routing::get;
        use axum::Router;
        use tower::{ServiceBuilder, ServiceExt};
        use tower_http::catch_panic::CatchPanicLayer;

        async fn boom() -> &'static str {
            panic!("boom")
        }

        let app = Router::new().route("/", get(boom)).layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(correlation_id))
                .layer(CatchPanicLayer::custom(panic_response)),
        );

        let request = axum::http::Request::get("/")
            .header(X_LC_CORRELATION_ID, "c-1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[X_LC_CORRELATION_ID], "c-1");

        let request = axum::http::Request::get("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(X_LC_CORRELATION_ID));
    }

    #[test]
    fn test_put_skips_invalid_values() {
        let mut headers = HeaderMap::new();
        put(&mut headers, "x-lc-location-country", "DE");
        put(&mut headers, "x-lc-location-city", "bad\nvalue");
        assert_eq!(headers.len(), 1);
    }
}
