//! Schema error types
//!
//! Error codes:
//! - UNKNOWN_SCHEMA
//! - MALFORMED_SCHEMA (fatal at startup)
//! - EMPTY_BODY
//! - MALFORMED_BODY
//! - SCHEMA_VALIDATION_FAILED

use std::fmt;

use crate::errors::{ErrorItem, ServiceError};

/// Severity levels for schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Client request rejected
    Reject,
    /// Service must not start
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Schema-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Schema name not registered
    UnknownSchema,
    /// Schema definition cannot be compiled
    MalformedSchema,
    /// Request body is empty
    EmptyBody,
    /// Request body is not JSON
    MalformedBody,
    /// Content violates schema
    ValidationFailed,
}

impl SchemaErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::UnknownSchema => "UNKNOWN_SCHEMA",
            SchemaErrorCode::MalformedSchema => "MALFORMED_SCHEMA",
            SchemaErrorCode::EmptyBody => "EMPTY_BODY",
            SchemaErrorCode::MalformedBody => "INVALID_BODY",
            SchemaErrorCode::ValidationFailed => "SCHEMA_VALIDATION_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            SchemaErrorCode::UnknownSchema | SchemaErrorCode::MalformedSchema => Severity::Fatal,
            _ => Severity::Reject,
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Classification of a single validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Leaf failure: type, length, format, required, ...
    Validation,
    AnyOf,
    OneOf,
    IfThenElse,
    MissingDependency,
    Internal,
}

impl IssueKind {
    /// Structural issues describe combinator outcomes rather than leaf failures
    pub fn is_structural(&self) -> bool {
        !matches!(self, IssueKind::Validation)
    }
}

/// One validation failure at a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    /// Dotted field path, `(root)` for the document itself
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueKind::Validation, field, message)
    }

    pub fn missing_field(parent: &str, field: &str) -> Self {
        let path = make_path(parent, field);
        Self::validation(path, format!("{} is required", field))
    }

    pub fn extra_field(parent: &str, field: &str) -> Self {
        Self::validation(
            make_path(parent, field),
            "Additional property is not allowed",
        )
    }

    pub fn type_mismatch(field: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self::validation(
            field,
            format!("Invalid type. Expected: {}, given: {}", expected, actual),
        )
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': {}", self.field, self.message)
    }
}

/// Joins a field onto a dotted path; the document root is `(root)`
pub(crate) fn make_path(parent: &str, field: &str) -> String {
    if parent.is_empty() || parent == ROOT_PATH {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

pub(crate) const ROOT_PATH: &str = "(root)";

/// Schema error type with full context
#[derive(Debug, Clone)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    schema_name: Option<String>,
    issues: Vec<ValidationIssue>,
}

impl SchemaError {
    /// Create an unknown schema error
    pub fn unknown_schema(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: SchemaErrorCode::UnknownSchema,
            message: format!("Schema '{}' not found", name),
            schema_name: Some(name),
            issues: Vec::new(),
        }
    }

    /// Create an error for a schema that cannot be read or compiled
    pub fn malformed_schema(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: SchemaErrorCode::MalformedSchema,
            message: format!("Malformed schema '{}': {}", name, reason.into()),
            schema_name: Some(name),
            issues: Vec::new(),
        }
    }

    pub fn empty_body(name: impl Into<String>) -> Self {
        Self {
            code: SchemaErrorCode::EmptyBody,
            message: "Request body is empty".into(),
            schema_name: Some(name.into()),
            issues: vec![ValidationIssue::validation(ROOT_PATH, "Request body is empty")],
        }
    }

    pub fn malformed_body(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code: SchemaErrorCode::MalformedBody,
            message: format!("Request body is not valid JSON: {}", reason),
            schema_name: Some(name.into()),
            issues: vec![ValidationIssue::validation(
                ROOT_PATH,
                format!("Invalid JSON: {}", reason),
            )],
        }
    }

    /// Create a validation failed error from the collected issues
    pub fn validation_failed(name: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        let name = name.into();
        Self {
            code: SchemaErrorCode::ValidationFailed,
            message: format!(
                "Content does not match schema '{}' ({} issue(s))",
                name,
                issues.len()
            ),
            schema_name: Some(name),
            issues,
        }
    }

    pub fn code(&self) -> SchemaErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    /// Every issue collected, structural included
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Issues shown to callers: leaf failures when any exist, structural otherwise
    pub fn surfaced_issues(&self) -> Vec<&ValidationIssue> {
        let leaves: Vec<&ValidationIssue> = self
            .issues
            .iter()
            .filter(|issue| !issue.kind.is_structural())
            .collect();
        if leaves.is_empty() {
            self.issues.iter().collect()
        } else {
            leaves
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for SchemaError {}

impl From<SchemaError> for ServiceError {
    fn from(err: SchemaError) -> Self {
        if err.is_fatal() {
            return ServiceError::internal(err.code().code()).with_source(err);
        }
        let items: Vec<ErrorItem> = err
            .surfaced_issues()
            .into_iter()
            .map(|issue| ErrorItem::for_field(issue.field.clone(), issue.message.clone()))
            .collect();
        ServiceError::bad_request(err.code().code())
            .with_items(items)
            .with_source(err)
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
