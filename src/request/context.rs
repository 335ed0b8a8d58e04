//! Ambient request context.
//!
//! Built once per request by the context middleware from the incoming
//! headers and stored in the request extensions. Handlers and the request
//! parser read the test flags and deadline from here instead of from the
//! headers directly.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tokio::time::Instant;
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_LC_CORRELATION_ID: &str = "x-lc-correlation-id";
pub const X_LC_SVC_TEST: &str = "x-lc-svc-test";
pub const X_LC_SVC_INTEGRATION_TEST: &str = "x-lc-svc-integration-test";
pub const X_LC_CALLER_ID: &str = "x-lc-caller-id";
pub const X_LC_LOCATION_PREFIX: &str = "x-lc-location-";

/// Default per-request budget
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub correlation_id: String,
    /// Rows written or read by this request belong to the test partition
    pub test: bool,
    /// Response drift is an error instead of a log line
    pub integration_test: bool,
    pub caller_id: Option<String>,
    /// `X-Lc-Location-*` headers, keyed by the lower-cased suffix
    pub location: BTreeMap<String, String>,
    pub deadline: Instant,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn flag(headers: &HeaderMap, name: &str) -> bool {
    header(headers, name).map_or(false, |v| v.eq_ignore_ascii_case("true"))
}

impl RequestContext {
    /// Reads the context headers; missing ids are generated. The request
    /// id doubles as the correlation id when only one of them is present.
    pub fn from_headers(headers: &HeaderMap, timeout: Duration) -> Self {
        let request_id = header(headers, X_REQUEST_ID).map(str::to_string);
        let correlation_id = header(headers, X_LC_CORRELATION_ID).map(str::to_string);
        let (request_id, correlation_id) = match (request_id, correlation_id) {
            (Some(r), Some(c)) => (r, c),
            (Some(r), None) => (r.clone(), r),
            (None, Some(c)) => (Uuid::new_v4().to_string(), c),
            (None, None) => {
                let id = Uuid::new_v4().to_string();
                (id.clone(), id)
            }
        };

        let location = headers
            .iter()
            .filter_map(|(name, value)| {
                let suffix = name.as_str().strip_prefix(X_LC_LOCATION_PREFIX)?;
                Some((suffix.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        Self {
            request_id,
            correlation_id,
            test: flag(headers, X_LC_SVC_TEST),
            integration_test: flag(headers, X_LC_SVC_INTEGRATION_TEST),
            caller_id: header(headers, X_LC_CALLER_ID).map(str::to_string),
            location,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<RequestContext>() {
            return Ok(context.clone());
        }
        Ok(RequestContext::from_headers(&parts.headers, DEFAULT_REQUEST_TIMEOUT))
    }
}
