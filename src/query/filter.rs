//! # Filter Sequence AST
//!
//! A search expression is a flat, left-to-right sequence of brackets,
//! connectives and typed filters. The sequence is kept exactly as the caller
//! wrote it; precedence is applied only when it is evaluated or rendered.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::errors::{QueryError, QueryErrorCode, QueryResult};

/// Declared type of a filter operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int64,
    Float64,
    String,
    Datetime,
    BoolArray,
    Int64Array,
    Float64Array,
    StringArray,
    DatetimeArray,
}

impl ValueType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOOL" => Some(ValueType::Bool),
            "INT64" => Some(ValueType::Int64),
            "FLOAT64" => Some(ValueType::Float64),
            "STRING" => Some(ValueType::String),
            "DATETIME" => Some(ValueType::Datetime),
            "BOOL_ARRAY" => Some(ValueType::BoolArray),
            "INT64_ARRAY" => Some(ValueType::Int64Array),
            "FLOAT64_ARRAY" => Some(ValueType::Float64Array),
            "STRING_ARRAY" => Some(ValueType::StringArray),
            "DATETIME_ARRAY" => Some(ValueType::DatetimeArray),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "BOOL",
            ValueType::Int64 => "INT64",
            ValueType::Float64 => "FLOAT64",
            ValueType::String => "STRING",
            ValueType::Datetime => "DATETIME",
            ValueType::BoolArray => "BOOL_ARRAY",
            ValueType::Int64Array => "INT64_ARRAY",
            ValueType::Float64Array => "FLOAT64_ARRAY",
            ValueType::StringArray => "STRING_ARRAY",
            ValueType::DatetimeArray => "DATETIME_ARRAY",
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ValueType::BoolArray
                | ValueType::Int64Array
                | ValueType::Float64Array
                | ValueType::StringArray
                | ValueType::DatetimeArray
        )
    }

    /// Element type of an array type; scalars map to themselves
    pub fn element(&self) -> ValueType {
        match self {
            ValueType::BoolArray => ValueType::Bool,
            ValueType::Int64Array => ValueType::Int64,
            ValueType::Float64Array => ValueType::Float64,
            ValueType::StringArray => ValueType::String,
            ValueType::DatetimeArray => ValueType::Datetime,
            scalar => *scalar,
        }
    }
}

/// Typed filter operand; arrays are homogeneous by construction
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Datetime(DateTime<Utc>),
    BoolArray(Vec<bool>),
    Int64Array(Vec<i64>),
    Float64Array(Vec<f64>),
    StringArray(Vec<String>),
    DatetimeArray(Vec<DateTime<Utc>>),
}

impl FilterValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            FilterValue::Bool(_) => ValueType::Bool,
            FilterValue::Int64(_) => ValueType::Int64,
            FilterValue::Float64(_) => ValueType::Float64,
            FilterValue::String(_) => ValueType::String,
            FilterValue::Datetime(_) => ValueType::Datetime,
            FilterValue::BoolArray(_) => ValueType::BoolArray,
            FilterValue::Int64Array(_) => ValueType::Int64Array,
            FilterValue::Float64Array(_) => ValueType::Float64Array,
            FilterValue::StringArray(_) => ValueType::StringArray,
            FilterValue::DatetimeArray(_) => ValueType::DatetimeArray,
        }
    }

    pub fn is_array(&self) -> bool {
        self.value_type().is_array()
    }

    /// Number of elements of an array operand
    pub fn array_len(&self) -> Option<usize> {
        match self {
            FilterValue::BoolArray(v) => Some(v.len()),
            FilterValue::Int64Array(v) => Some(v.len()),
            FilterValue::Float64Array(v) => Some(v.len()),
            FilterValue::StringArray(v) => Some(v.len()),
            FilterValue::DatetimeArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Splits a two-element array into its bounds
    pub fn range_bounds(&self) -> Option<(FilterValue, FilterValue)> {
        fn pair<T: Clone>(v: &[T], wrap: fn(T) -> FilterValue) -> Option<(FilterValue, FilterValue)> {
            match v {
                [lo, hi] => Some((wrap(lo.clone()), wrap(hi.clone()))),
                _ => None,
            }
        }
        match self {
            FilterValue::BoolArray(v) => pair(v, FilterValue::Bool),
            FilterValue::Int64Array(v) => pair(v, FilterValue::Int64),
            FilterValue::Float64Array(v) => pair(v, FilterValue::Float64),
            FilterValue::StringArray(v) => pair(v, FilterValue::String),
            FilterValue::DatetimeArray(v) => pair(v, FilterValue::Datetime),
            _ => None,
        }
    }

    /// Decodes a JSON operand declared as `value_type`.
    pub fn from_json(value_type: ValueType, value: &Value) -> QueryResult<Self> {
        if value_type.is_array() {
            return decode_array(value_type, value);
        }
        decode_scalar(value_type, value)
    }

    /// Wire representation of the operand
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Bool(b) => json!(b),
            FilterValue::Int64(n) => json!(n),
            FilterValue::Float64(f) => json!(f),
            FilterValue::String(s) => json!(s),
            FilterValue::Datetime(t) => json!(format_datetime(t)),
            FilterValue::BoolArray(v) => json!(v),
            FilterValue::Int64Array(v) => json!(v),
            FilterValue::Float64Array(v) => json!(v),
            FilterValue::StringArray(v) => json!(v),
            FilterValue::DatetimeArray(v) => {
                Value::Array(v.iter().map(|t| json!(format_datetime(t))).collect())
            }
        }
    }
}

/// RFC 3339 in UTC with as many fractional digits as needed
pub fn format_datetime(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_datetime(value: &Value) -> QueryResult<DateTime<Utc>> {
    let s = value.as_str().ok_or_else(mismatch)?;
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QueryErrorCode::DatetimeValueMustBeRfc3339.into())
}

fn mismatch() -> QueryError {
    QueryError::new(QueryErrorCode::ValueDoesNotMatchValueType)
}

fn decode_scalar(value_type: ValueType, value: &Value) -> QueryResult<FilterValue> {
    match value_type {
        ValueType::Bool => value.as_bool().map(FilterValue::Bool).ok_or_else(mismatch),
        ValueType::Int64 => value.as_i64().map(FilterValue::Int64).ok_or_else(mismatch),
        ValueType::Float64 => value.as_f64().map(FilterValue::Float64).ok_or_else(mismatch),
        ValueType::String => value
            .as_str()
            .map(|s| FilterValue::String(s.to_string()))
            .ok_or_else(mismatch),
        ValueType::Datetime => parse_datetime(value).map(FilterValue::Datetime),
        _ => Err(mismatch()),
    }
}

fn decode_array(value_type: ValueType, value: &Value) -> QueryResult<FilterValue> {
    let items = value.as_array().ok_or_else(mismatch)?;

    match value_type {
        ValueType::BoolArray => {
            if items.is_empty() {
                return Err(QueryErrorCode::BoolArrayCannotBeEmpty.into());
            }
            items
                .iter()
                .map(|v| v.as_bool().ok_or_else(mismatch))
                .collect::<QueryResult<Vec<_>>>()
                .map(FilterValue::BoolArray)
        }
        ValueType::Int64Array | ValueType::Float64Array => {
            if items.is_empty() {
                return Err(QueryErrorCode::NumberArrayCannotBeEmpty.into());
            }
            let numbers = items.iter().filter(|v| v.is_number()).count();
            if numbers != items.len() {
                return Err(if numbers == 0 {
                    mismatch()
                } else {
                    QueryErrorCode::NumberArrayCannotMixNumbersAndOtherTypes.into()
                });
            }
            let integers = items.iter().filter(|v| v.is_i64() || v.is_u64()).count();
            if integers != 0 && integers != items.len() {
                return Err(QueryErrorCode::NumberArrayCannotMixIntegersAndDecimals.into());
            }
            if value_type == ValueType::Int64Array {
                items
                    .iter()
                    .map(|v| v.as_i64().ok_or_else(mismatch))
                    .collect::<QueryResult<Vec<_>>>()
                    .map(FilterValue::Int64Array)
            } else {
                Ok(FilterValue::Float64Array(
                    items.iter().filter_map(Value::as_f64).collect(),
                ))
            }
        }
        ValueType::StringArray => {
            if items.is_empty() {
                return Err(QueryErrorCode::StringArrayCannotBeEmpty.into());
            }
            items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(mismatch)
                })
                .collect::<QueryResult<Vec<_>>>()
                .map(FilterValue::StringArray)
        }
        ValueType::DatetimeArray => {
            if items.is_empty() {
                return Err(QueryErrorCode::DatetimeArrayCannotBeEmpty.into());
            }
            items
                .iter()
                .map(parse_datetime)
                .collect::<QueryResult<Vec<_>>>()
                .map(FilterValue::DatetimeArray)
        }
        _ => Err(mismatch()),
    }
}

/// Primary predicate of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Equals,
    IsNull,
    ArrayContains,
    InArray,
    InRange,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    CaseInsensitive,
    PartialMatch,
}

impl Predicate {
    /// Wire flag selecting this predicate; `Equals` has none
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Predicate::Equals => None,
            Predicate::IsNull => Some("is_null"),
            Predicate::ArrayContains => Some("array_contains"),
            Predicate::InArray => Some("in_array"),
            Predicate::InRange => Some("in_range"),
            Predicate::GreaterThan => Some("is_greater_than"),
            Predicate::GreaterThanOrEqual => Some("is_greater_than_or_equal_to"),
            Predicate::LessThan => Some("is_less_than"),
            Predicate::LessThanOrEqual => Some("is_less_than_or_equal_to"),
            Predicate::CaseInsensitive => Some("case_insensitive_string"),
            Predicate::PartialMatch => Some("partial_match_string"),
        }
    }

    /// Every predicate selected by a wire flag
    pub const FLAGGED: [Predicate; 10] = [
        Predicate::IsNull,
        Predicate::ArrayContains,
        Predicate::InArray,
        Predicate::InRange,
        Predicate::GreaterThan,
        Predicate::GreaterThanOrEqual,
        Predicate::LessThan,
        Predicate::LessThanOrEqual,
        Predicate::CaseInsensitive,
        Predicate::PartialMatch,
    ];
}

pub const NOT_CONDITION_FLAG: &str = "not_condition";

/// Validated option selection: one primary predicate plus optional negation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterOptions {
    predicate: Predicate,
    negated: bool,
}

impl FilterOptions {
    pub fn new(predicate: Predicate, negated: bool) -> Self {
        Self { predicate, negated }
    }

    pub fn equals() -> Self {
        Self::new(Predicate::Equals, false)
    }

    /// Reads the option flags of a wire filter object. More than one primary
    /// flag set to `true` is rejected.
    pub fn from_flags(filter: &Map<String, Value>) -> QueryResult<Self> {
        let is_set = |flag: &str| filter.get(flag).and_then(Value::as_bool).unwrap_or(false);

        let mut selected = Predicate::FLAGGED
            .iter()
            .filter(|p| p.flag().map_or(false, is_set));
        let predicate = match (selected.next(), selected.next()) {
            (None, _) => Predicate::Equals,
            (Some(p), None) => *p,
            (Some(_), Some(_)) => {
                return Err(QueryErrorCode::ExclusiveOptionsUsedForSameFilter.into())
            }
        };

        Ok(Self::new(predicate, is_set(NOT_CONDITION_FLAG)))
    }

    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    pub fn negated(&self) -> bool {
        self.negated
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self::equals()
    }
}

/// A single typed predicate over one column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub key: String,
    /// Absent only for `is_null`
    pub value: Option<FilterValue>,
    pub options: FilterOptions,
}

impl Filter {
    pub fn new(key: impl Into<String>, value: Option<FilterValue>, options: FilterOptions) -> Self {
        Self {
            key: key.into(),
            value,
            options,
        }
    }

    /// Create an equality filter
    pub fn eq(key: impl Into<String>, value: FilterValue) -> Self {
        Self::new(key, Some(value), FilterOptions::equals())
    }

    /// Create an `is_null` filter
    pub fn is_null(key: impl Into<String>, negated: bool) -> Self {
        Self::new(key, None, FilterOptions::new(Predicate::IsNull, negated))
    }

    /// Wire representation: `{key, value_type?, value?, <flag>: true...}`
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("key".into(), json!(self.key));
        if let Some(ref value) = self.value {
            map.insert("value_type".into(), json!(value.value_type().as_str()));
            map.insert("value".into(), value.to_json());
        }
        if let Some(flag) = self.options.predicate().flag() {
            map.insert(flag.into(), json!(true));
        }
        if self.options.negated() {
            map.insert(NOT_CONDITION_FLAG.into(), json!(true));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bracket {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connective {
    And,
    Or,
}

/// One token of a search expression
#[derive(Debug, Clone, PartialEq)]
pub enum LinkedFilter {
    Bracket(Bracket),
    Connective(Connective),
    Filter(Filter),
}

impl LinkedFilter {
    pub const OPEN: LinkedFilter = LinkedFilter::Bracket(Bracket::Open);
    pub const CLOSE: LinkedFilter = LinkedFilter::Bracket(Bracket::Close);
    pub const AND: LinkedFilter = LinkedFilter::Connective(Connective::And);
    pub const OR: LinkedFilter = LinkedFilter::Connective(Connective::Or);

    /// Operator type name on the wire, `None` for filters
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            LinkedFilter::Bracket(Bracket::Open) => Some("OPEN_BRACKET"),
            LinkedFilter::Bracket(Bracket::Close) => Some("CLOSE_BRACKET"),
            LinkedFilter::Connective(Connective::And) => Some("AND"),
            LinkedFilter::Connective(Connective::Or) => Some("OR"),
            LinkedFilter::Filter(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            LinkedFilter::Filter(filter) => json!({ "filter": filter.to_json() }),
            operator => json!({ "type": operator.type_name() }),
        }
    }

    pub fn as_filter(&self) -> Option<&Filter> {
        match self {
            LinkedFilter::Filter(filter) => Some(filter),
            _ => None,
        }
    }
}

/// Filters of a sequence, in order
pub fn filters_of(sequence: &[LinkedFilter]) -> impl Iterator<Item = &Filter> {
    sequence.iter().filter_map(LinkedFilter::as_filter)
}

/// Scopes a user expression to the caller's test flag:
/// `( <user> ) AND ( test = <test> )`, or `( test = <test> )` when empty.
pub fn with_test_conjunction(user: Vec<LinkedFilter>, test: bool) -> Vec<LinkedFilter> {
    let test_filter = [
        LinkedFilter::OPEN,
        LinkedFilter::Filter(Filter::eq("test", FilterValue::Bool(test))),
        LinkedFilter::CLOSE,
    ];
    if user.is_empty() {
        return test_filter.to_vec();
    }

    let mut sequence = Vec::with_capacity(user.len() + 6);
    sequence.push(LinkedFilter::OPEN);
    sequence.extend(user);
    sequence.push(LinkedFilter::CLOSE);
    sequence.push(LinkedFilter::AND);
    sequence.extend(test_filter);
    sequence
}
