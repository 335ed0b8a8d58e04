//! Store error types and their HTTP mapping.

use std::time::Duration;

use thiserror::Error;

use crate::errors::ServiceError;
use crate::query::QueryError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Name of the primary key constraint of the `car` table
pub const PRIMARY_KEY_CONSTRAINT: &str = "car_pkey";

/// Name of the unique index over `(brand_name, model_name)`
pub const BRAND_MODEL_INDEX: &str = "car_brand_name_model_name_idx";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with the requested key
    #[error("Entity not found")]
    NotFound,

    /// A car with the same brand and model, or the same id, already exists
    #[error("OBJECT_ALREADY_EXISTS")]
    AlreadyExists,

    /// A write collided with a unique index other than the primary key
    #[error("unique index violated: {index}")]
    UniqueViolation { index: String },

    /// Caller's test flag differs from the row's
    #[error("ACCESS_FORBIDDEN_BY_TEST")]
    AccessForbiddenByTest,

    /// Row changed after the caller's If-Unmodified-Since instant
    #[error("OBJECT_MODIFIED_SINCE")]
    ModifiedSince,

    /// Search expression does not bind to the car columns
    #[error(transparent)]
    InvalidFilter(#[from] QueryError),

    /// Database cannot be reached or does not exist
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// Transaction aborted by a serialization failure or deadlock
    #[error("transaction aborted: {message}")]
    Aborted { message: String },

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {timeout:?}")]
    DeadlineExceeded {
        operation: String,
        timeout: Duration,
    },

    /// Anything else the database reported
    #[error("internal store error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Whether the whole transaction may be run again
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Aborted { .. })
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        StoreError::Internal {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                let message = db_err.message().to_string();
                match code.as_str() {
                    // unique_violation
                    "23505" => match db_err.constraint() {
                        Some(PRIMARY_KEY_CONSTRAINT) => StoreError::AlreadyExists,
                        Some(index) => StoreError::UniqueViolation {
                            index: index.to_string(),
                        },
                        None => StoreError::UniqueViolation {
                            index: "unknown".to_string(),
                        },
                    },
                    // serialization_failure, deadlock_detected
                    "40001" | "40P01" => StoreError::Aborted { message },
                    // query_canceled
                    "57014" => StoreError::DeadlineExceeded {
                        operation: "statement".to_string(),
                        timeout: Duration::ZERO,
                    },
                    // invalid_catalog_name, admin shutdown family, connection exceptions
                    "3D000" | "57P01" | "57P02" | "57P03" => StoreError::Unavailable { message },
                    c if c.starts_with("08") => StoreError::Unavailable { message },
                    _ => StoreError::Internal { message },
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable {
                message: err.to_string(),
            },
            other => StoreError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::not_found("Entity not found"),
            StoreError::AlreadyExists => ServiceError::conflict("OBJECT_ALREADY_EXISTS"),
            StoreError::UniqueViolation { index } => {
                ServiceError::conflict("OBJECT_CANNOT_BE_CREATED_OR_UPDATED")
                    .with_metadata("index", index)
            }
            StoreError::AccessForbiddenByTest => {
                ServiceError::unprocessable_entity("ACCESS_FORBIDDEN_BY_TEST")
            }
            StoreError::ModifiedSince => ServiceError::precondition_failed("OBJECT_MODIFIED_SINCE"),
            StoreError::InvalidFilter(query) => query.into(),
            err @ StoreError::Unavailable { .. } => {
                ServiceError::bad_gateway("STORE_UNAVAILABLE").with_source(err)
            }
            err @ StoreError::Aborted { .. } => {
                ServiceError::bad_gateway("STORE_TRANSACTION_ABORTED").with_source(err)
            }
            err @ StoreError::Internal { .. } => {
                ServiceError::bad_gateway("STORE_ERROR").with_source(err)
            }
            err @ StoreError::DeadlineExceeded { .. } => {
                ServiceError::gateway_timeout("DEADLINE_EXCEEDED").with_source(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::query::QueryErrorCode;

    #[test]
    fn test_business_errors_map_to_client_statuses() {
        let cases = [
            (StoreError::NotFound, ErrorKind::NotFound, "Entity not found"),
            (StoreError::AlreadyExists, ErrorKind::Conflict, "OBJECT_ALREADY_EXISTS"),
            (
                StoreError::AccessForbiddenByTest,
                ErrorKind::UnprocessableEntity,
                "ACCESS_FORBIDDEN_BY_TEST",
            ),
            (
                StoreError::ModifiedSince,
                ErrorKind::PreconditionFailed,
                "OBJECT_MODIFIED_SINCE",
            ),
        ];
        for (store, kind, message) in cases {
            let err: ServiceError = store.into();
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), message);
        }
    }

    #[test]
    fn test_unique_violation_carries_index() {
        let err: ServiceError = StoreError::UniqueViolation {
            index: BRAND_MODEL_INDEX.to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "OBJECT_CANNOT_BE_CREATED_OR_UPDATED");
        assert_eq!(
            err.metadata().get("index").map(String::as_str),
            Some(BRAND_MODEL_INDEX)
        );
    }

    #[test]
    fn test_infrastructure_errors_map_to_gateway_statuses() {
        let err: ServiceError = StoreError::Aborted {
            message: "could not serialize access".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::BadGateway);

        let err: ServiceError = StoreError::Unavailable {
            message: "database \"cars\" does not exist".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::BadGateway);

        let err: ServiceError = StoreError::DeadlineExceeded {
            operation: "search_cars".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::GatewayTimeout);
    }

    #[test]
    fn test_invalid_filter_keeps_query_code() {
        let err: ServiceError = StoreError::from(QueryError::at(QueryErrorCode::UnknownFilterKey, 1)).into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.message(), "UNKNOWN_FILTER_KEY");
    }

    #[test]
    fn test_sqlx_errors() {
        assert!(matches!(StoreError::from(sqlx::Error::RowNotFound), StoreError::NotFound));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable { .. }
        ));
        assert!(StoreError::Aborted { message: String::new() }.is_retryable());
        assert!(!StoreError::NotFound.is_retryable());
    }
}
