//! # Query Errors
//!
//! Every way a search expression can be rejected maps to exactly one code.
//! Codes are part of the HTTP contract and must not be renamed.

use std::fmt;

use thiserror::Error;

use crate::errors::ServiceError;

/// Result type for query parsing
pub type QueryResult<T> = Result<T, QueryError>;

/// Search expression rejection codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorCode {
    // ==================
    // Decoding
    // ==================
    NotValidBase64,
    NotValidJson,
    NotValidLegacyExpression,
    MustBeAnArray,
    LinkedFilterMustBeAnObject,

    // ==================
    // Token shape
    // ==================
    LinkedFilterCannotBeBothFilterAndOperator,
    LinkedFilterMustBeFilterOrOperator,
    LinkedFilterTypeIsInvalid,

    // ==================
    // Sequence structure
    // ==================
    MustContainFilterSurroundedByBrackets,
    MustStartWithOpenBracket,
    MustEndWithCloseBracket,
    BracketCountsMustMatch,
    FilterMustBePrecededByBracketOrConnective,
    FilterMustBeFollowedByBracketOrConnective,
    ConnectiveMustFollowFilterOrCloseBracket,
    ConnectiveMustPrecedeFilterOrOpenBracket,
    CloseBracketCannotFollowOperator,
    OpenBracketMustFollowOpenBracketOrConnective,
    CloseBracketHasNoMatchingOpenBracket,

    // ==================
    // Filter content
    // ==================
    FilterKeyIsRequired,
    ExclusiveOptionsUsedForSameFilter,
    IsNullCannotBeUsedWithValue,
    ValueIsRequired,
    ValueTypeIsRequired,
    ValueTypeIsInvalid,
    ValueDoesNotMatchValueType,
    DatetimeValueMustBeRfc3339,
    NumberArrayCannotMixIntegersAndDecimals,
    NumberArrayCannotMixNumbersAndOtherTypes,
    BoolArrayCannotBeEmpty,
    NumberArrayCannotBeEmpty,
    StringArrayCannotBeEmpty,
    DatetimeArrayCannotBeEmpty,
    InRangeRequiresArrayOfTwoElements,
    InArrayRequiresArrayValue,
    OptionRequiresScalarValue,
    OptionRequiresStringValue,

    // ==================
    // Column binding
    // ==================
    UnknownFilterKey,
    ValueTypeDoesNotMatchColumn,
    ArrayContainsRequiresArrayColumn,
}

impl QueryErrorCode {
    /// Returns the wire code
    pub fn code(&self) -> &'static str {
        use QueryErrorCode::*;
        match self {
            NotValidBase64 => "QUERY_IS_NOT_VALID_BASE64",
            NotValidJson => "QUERY_IS_NOT_VALID_JSON",
            NotValidLegacyExpression => "QUERY_IS_NOT_VALID_LEGACY_EXPRESSION",
            MustBeAnArray => "QUERY_MUST_BE_AN_ARRAY",
            LinkedFilterMustBeAnObject => "LINKED_FILTER_MUST_BE_AN_OBJECT",
            LinkedFilterCannotBeBothFilterAndOperator => {
                "LINKED_FILTER_CANNOT_BE_BOTH_FILTER_AND_OPERATOR"
            }
            LinkedFilterMustBeFilterOrOperator => "LINKED_FILTER_MUST_BE_FILTER_OR_OPERATOR",
            LinkedFilterTypeIsInvalid => "LINKED_FILTER_TYPE_IS_INVALID",
            MustContainFilterSurroundedByBrackets => {
                "QUERY_MUST_CONTAIN_AT_LEAST_ONE_FILTER_SURROUNDED_BY_BRACKETS"
            }
            MustStartWithOpenBracket => "QUERY_MUST_START_WITH_OPEN_BRACKET",
            MustEndWithCloseBracket => "QUERY_MUST_END_WITH_CLOSE_BRACKET",
            BracketCountsMustMatch => "OPEN_AND_CLOSE_BRACKET_COUNTS_MUST_MATCH",
            FilterMustBePrecededByBracketOrConnective => {
                "FILTER_MUST_BE_PRECEDED_BY_BRACKET_OR_CONNECTIVE"
            }
            FilterMustBeFollowedByBracketOrConnective => {
                "FILTER_MUST_BE_FOLLOWED_BY_BRACKET_OR_CONNECTIVE"
            }
            ConnectiveMustFollowFilterOrCloseBracket => {
                "CONNECTIVE_MUST_FOLLOW_FILTER_OR_CLOSE_BRACKET"
            }
            ConnectiveMustPrecedeFilterOrOpenBracket => {
                "CONNECTIVE_MUST_PRECEDE_FILTER_OR_OPEN_BRACKET"
            }
            CloseBracketCannotFollowOperator => "CLOSE_BRACKET_CANNOT_FOLLOW_OPERATOR",
            OpenBracketMustFollowOpenBracketOrConnective => {
                "OPEN_BRACKET_MUST_FOLLOW_OPEN_BRACKET_OR_CONNECTIVE"
            }
            CloseBracketHasNoMatchingOpenBracket => "CLOSE_BRACKET_HAS_NO_MATCHING_OPEN_BRACKET",
            FilterKeyIsRequired => "FILTER_KEY_IS_REQUIRED",
            ExclusiveOptionsUsedForSameFilter => "EXCLUSIVE_OPTIONS_USED_FOR_SAME_FILTER",
            IsNullCannotBeUsedWithValue => {
                "OPTION_IS_NULL_EXISTS_CANNOT_BE_USED_WITH_VALUE_OR_VALUE_TYPE"
            }
            ValueIsRequired => "VALUE_IS_REQUIRED",
            ValueTypeIsRequired => "VALUE_TYPE_IS_REQUIRED",
            ValueTypeIsInvalid => "VALUE_TYPE_IS_INVALID",
            ValueDoesNotMatchValueType => "VALUE_DOES_NOT_MATCH_VALUE_TYPE",
            DatetimeValueMustBeRfc3339 => "DATETIME_VALUE_MUST_BE_RFC3339",
            NumberArrayCannotMixIntegersAndDecimals => {
                "NUMBER_ARRAY_VALUE_CANNOT_MIX_INTEGERS_AND_DECIMALS"
            }
            NumberArrayCannotMixNumbersAndOtherTypes => {
                "NUMBER_ARRAY_VALUE_CANNOT_MIX_NUMBERS_AND_OTHER_TYPES"
            }
            BoolArrayCannotBeEmpty => "BOOL_ARRAY_VALUE_CANNOT_BE_EMPTY",
            NumberArrayCannotBeEmpty => "NUMBER_ARRAY_VALUE_CANNOT_BE_EMPTY",
            StringArrayCannotBeEmpty => "STRING_ARRAY_VALUE_CANNOT_BE_EMPTY",
            DatetimeArrayCannotBeEmpty => "DATETIME_ARRAY_VALUE_CANNOT_BE_EMPTY",
            InRangeRequiresArrayOfTwoElements => "OPTION_IN_RANGE_REQUIRES_ARRAY_OF_TWO_ELEMENTS",
            InArrayRequiresArrayValue => "OPTION_IN_ARRAY_REQUIRES_ARRAY_VALUE",
            OptionRequiresScalarValue => "OPTION_REQUIRES_SCALAR_VALUE",
            OptionRequiresStringValue => "OPTION_REQUIRES_STRING_VALUE",
            UnknownFilterKey => "UNKNOWN_FILTER_KEY",
            ValueTypeDoesNotMatchColumn => "VALUE_TYPE_DOES_NOT_MATCH_COLUMN",
            ArrayContainsRequiresArrayColumn => "OPTION_ARRAY_CONTAINS_REQUIRES_ARRAY_COLUMN",
        }
    }
}

impl fmt::Display for QueryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A rejected search expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}")]
pub struct QueryError {
    pub code: QueryErrorCode,
    /// Index of the offending token, when one can be named
    pub position: Option<usize>,
}

impl QueryError {
    pub fn new(code: QueryErrorCode) -> Self {
        Self {
            code,
            position: None,
        }
    }

    pub fn at(code: QueryErrorCode, position: usize) -> Self {
        Self {
            code,
            position: Some(position),
        }
    }
}

impl From<QueryErrorCode> for QueryError {
    fn from(code: QueryErrorCode) -> Self {
        QueryError::new(code)
    }
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        let service = ServiceError::bad_request(err.code.code());
        match err.position {
            Some(position) => service.with_metadata("position", position.to_string()),
            None => service,
        }
    }
}
