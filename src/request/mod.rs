//! # Request Binding
//!
//! Route inputs to typed store requests, plus the ambient per-request
//! context and pagination headers.

pub mod context;
pub mod errors;
pub mod pagination;
pub mod parser;

pub use context::{
    RequestContext, DEFAULT_REQUEST_TIMEOUT, X_LC_CALLER_ID, X_LC_CORRELATION_ID,
    X_LC_LOCATION_PREFIX, X_LC_SVC_INTEGRATION_TEST, X_LC_SVC_TEST, X_REQUEST_ID,
};
pub use errors::{RequestError, RequestResult};
pub use pagination::{pagination_headers, parse_pagination};
pub use parser::{parse_http_date, RequestParser, IF_UNMODIFIED_SINCE};
