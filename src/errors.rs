//! # Service Errors
//!
//! The error taxonomy shared by every layer of the service and its single
//! HTTP rendering routine.
//!
//! An error carries an immutable kind (which fixes the status code), an
//! enumerated message, optional `{field, message}` items, optional metadata
//! and the chain of context messages pushed by [`ServiceError::wrap`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error categories, one per HTTP status the service emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    Teapot,
    UnprocessableEntity,
    Internal,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
}

impl ErrorKind {
    /// Get HTTP status code for this kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Teapot => StatusCode::IM_A_TEAPOT,
            ErrorKind::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether the message and items are rendered into the response body
    pub fn exposes_body(&self) -> bool {
        matches!(
            self,
            ErrorKind::BadRequest
                | ErrorKind::NotFound
                | ErrorKind::Conflict
                | ErrorKind::PreconditionFailed
                | ErrorKind::Teapot
                | ErrorKind::UnprocessableEntity
                | ErrorKind::BadGateway
                | ErrorKind::GatewayTimeout
        )
    }

    /// Whether the fault lies with the server rather than the caller
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status_code())
    }
}

/// One entry of an error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ErrorItem {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Service error with kind, message, items, metadata and wrap chain
#[derive(Debug, Clone)]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    items: Vec<ErrorItem>,
    metadata: BTreeMap<String, String>,
    wrapped: Vec<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ServiceError {
    /// Create a new error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            items: Vec::new(),
            metadata: BTreeMap::new(),
            wrapped: Vec::new(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn teapot(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Teapot, message)
    }

    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnprocessableEntity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadGateway, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GatewayTimeout, message)
    }

    /// Attach body items
    pub fn with_items(mut self, items: impl IntoIterator<Item = ErrorItem>) -> Self {
        self.items.extend(items);
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Push a context message; kind, message and cause are preserved
    pub fn wrap(mut self, context: impl Into<String>) -> Self {
        self.wrapped.push(context.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn items(&self) -> &[ErrorItem] {
        &self.items
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Context messages, innermost first
    pub fn wrapped(&self) -> &[String] {
        &self.wrapped
    }

    /// Items rendered in the response body
    pub fn body_items(&self) -> Vec<ErrorItem> {
        if self.items.is_empty() {
            vec![ErrorItem::new(self.message.clone())]
        } else {
            self.items.clone()
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for context in self.wrapped.iter().rev() {
            write!(f, "{}: ", context)?;
        }
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.kind.is_server_fault() {
            tracing::error!(
                status = status.as_u16(),
                metadata = ?self.metadata,
                error = %self,
                "request failed"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                items = self.items.len(),
                error = %self,
                "request rejected"
            );
        }

        if self.kind.exposes_body() {
            (status, Json(self.body_items())).into_response()
        } else {
            status.into_response()
        }
    }
}
