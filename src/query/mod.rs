//! # Search Query
//!
//! Decoding and validation of the `query` parameter of a car search into an
//! ordered sequence of brackets, connectives and typed filters.

pub mod errors;
pub mod filter;
pub mod legacy;
pub mod parser;

pub use errors::{QueryError, QueryErrorCode, QueryResult};
pub use filter::{
    filters_of, format_datetime, with_test_conjunction, Bracket, Connective, Filter, FilterOptions,
    FilterValue, LinkedFilter, Predicate, ValueType,
};
pub use parser::{decode_document, decode_query, encode_query, parse_linked_filters, wire_filters};
