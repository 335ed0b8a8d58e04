//! Schema validation for request bodies, search filters and responses
//!
//! # Design Principles
//!
//! - Schemas are loaded once at startup from a fixed set of names
//! - A missing or malformed schema prevents startup
//! - Every failure is reported as a `{field, message}` issue
//! - Leaf issues hide structural ones when both exist

mod errors;
mod formats;
mod loader;
mod types;
mod validator;

pub use errors::{IssueKind, SchemaError, SchemaErrorCode, SchemaResult, Severity, ValidationIssue};
pub use formats::{FormatChecker, FormatRegistry};
pub use loader::{SchemaLoader, CAR, CARS, CARS_SEARCH, CAR_CREATE, CAR_UPDATE, SCHEMA_NAMES};
pub use types::{JsonType, Schema, SchemaNode};
pub use validator::SchemaValidator;
