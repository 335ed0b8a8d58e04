//! Request binding errors

use thiserror::Error;

use crate::errors::ServiceError;
use crate::query::QueryError;
use crate::schema::SchemaError;

pub type RequestResult<T> = Result<T, RequestError>;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Missing id in url params")]
    MissingId,

    #[error("INVALID_IF_UNMODIFIED_SINCE_HEADER")]
    InvalidIfUnmodifiedSince,

    #[error("INVALID_PAGINATION_LIMIT")]
    InvalidPaginationLimit,

    #[error("INVALID_PAGINATION_OFFSET")]
    InvalidPaginationOffset,

    #[error("INVALID_PAGINATION_ORDER")]
    InvalidPaginationOrder,

    #[error("PAGINATION_LIMIT_EXCEEDED")]
    PaginationLimitExceeded,

    /// Body passed its schema but does not decode into the request type
    #[error("INVALID_BODY")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<RequestError> for ServiceError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Schema(schema) => schema.into(),
            RequestError::Query(query) => query.into(),
            RequestError::Decode(source) => ServiceError::bad_request("INVALID_BODY").with_source(source),
            other => ServiceError::bad_request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_messages_are_wire_codes() {
        let err: ServiceError = RequestError::MissingId.into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.message(), "Missing id in url params");

        let err: ServiceError = RequestError::PaginationLimitExceeded.into();
        assert_eq!(err.message(), "PAGINATION_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_schema_errors_keep_their_mapping() {
        let err: ServiceError = RequestError::from(SchemaError::empty_body("car_create")).into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.message(), "EMPTY_BODY");
    }
}
