//! # Search Query Parser
//!
//! Decodes the `query` URL parameter into a validated filter sequence.
//!
//! Wire form: base64 (standard or URL-safe alphabet, padding optional) of a
//! JSON array whose items are `{"type": "OPEN_BRACKET"|"CLOSE_BRACKET"|"AND"|"OR"}`
//! or `{"filter": {...}}`. A raw query starting with `(` is the legacy
//! textual form and is handled by [`super::legacy`].
//!
//! Checks run in a fixed order so a malformed query yields one stable code:
//! decoding, token shape, presence of a bracketed filter, first/last token,
//! bracket counts, neighbour rules (left to right), then filter content.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};

use super::errors::{QueryError, QueryErrorCode, QueryResult};
use super::filter::{
    Bracket, Connective, Filter, FilterOptions, FilterValue, LinkedFilter, Predicate, ValueType,
};
use super::legacy;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Encoder used by [`encode_query`]
const URL_SAFE_NO_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_encode_padding(false),
);

/// Parses a raw `query` value in either wire form. An empty query is an
/// empty sequence.
pub fn decode_query(raw: &str) -> QueryResult<Vec<LinkedFilter>> {
    match decode_document(raw)? {
        Some(document) => parse_linked_filters(&document),
        None => Ok(Vec::new()),
    }
}

/// Decodes a raw `query` value to its JSON wire document without checking
/// its content. `None` for an empty query.
pub fn decode_document(raw: &str) -> QueryResult<Option<Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.starts_with('(') {
        return legacy::to_wire_tokens(raw).map(|tokens| Some(Value::Array(tokens)));
    }

    let bytes = decode_base64(raw)?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|_| QueryError::new(QueryErrorCode::NotValidJson))
}

/// The `filter` objects of a wire document as the client sent them
pub fn wire_filters(document: &Value) -> Vec<Value> {
    document
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("filter"))
                .filter(|filter| filter.is_object())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Encodes a sequence in the JSON wire form, URL-safe without padding
pub fn encode_query(sequence: &[LinkedFilter]) -> String {
    let document = Value::Array(sequence.iter().map(LinkedFilter::to_json).collect());
    URL_SAFE_NO_PAD.encode(document.to_string())
}

fn decode_base64(raw: &str) -> QueryResult<Vec<u8>> {
    // Form decoding turns '+' into ' '
    let raw = raw.replace(' ', "+");
    let engine = if raw.contains('-') || raw.contains('_') {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };
    engine
        .decode(raw.as_bytes())
        .map_err(|_| QueryError::new(QueryErrorCode::NotValidBase64))
}

/// Token shape after the first pass
#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Open,
    Close,
    And,
    Or,
    Filter(&'a Map<String, Value>),
}

impl Token<'_> {
    fn is_filter(&self) -> bool {
        matches!(self, Token::Filter(_))
    }

    fn is_connective(&self) -> bool {
        matches!(self, Token::And | Token::Or)
    }
}

/// Validates a decoded JSON document and builds the sequence.
pub fn parse_linked_filters(document: &Value) -> QueryResult<Vec<LinkedFilter>> {
    let items = document
        .as_array()
        .ok_or(QueryErrorCode::MustBeAnArray)?;

    let objects = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object()
                .ok_or_else(|| QueryError::at(QueryErrorCode::LinkedFilterMustBeAnObject, i))
        })
        .collect::<QueryResult<Vec<_>>>()?;

    let tokens = objects
        .iter()
        .enumerate()
        .map(|(i, object)| classify(i, object))
        .collect::<QueryResult<Vec<_>>>()?;

    check_structure(&tokens)?;

    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| match token {
            Token::Open => Ok(LinkedFilter::Bracket(Bracket::Open)),
            Token::Close => Ok(LinkedFilter::Bracket(Bracket::Close)),
            Token::And => Ok(LinkedFilter::Connective(Connective::And)),
            Token::Or => Ok(LinkedFilter::Connective(Connective::Or)),
            Token::Filter(object) => parse_filter(object)
                .map(LinkedFilter::Filter)
                .map_err(|e| QueryError::at(e.code, i)),
        })
        .collect()
}

fn classify(position: usize, object: &Map<String, Value>) -> QueryResult<Token<'_>> {
    let type_field = object.get("type");
    let filter_field = object.get("filter");
    match (type_field, filter_field) {
        (Some(_), Some(_)) => Err(QueryError::at(
            QueryErrorCode::LinkedFilterCannotBeBothFilterAndOperator,
            position,
        )),
        (None, None) => Err(QueryError::at(
            QueryErrorCode::LinkedFilterMustBeFilterOrOperator,
            position,
        )),
        (None, Some(filter)) => filter.as_object().map(Token::Filter).ok_or_else(|| {
            QueryError::at(QueryErrorCode::LinkedFilterMustBeFilterOrOperator, position)
        }),
        (Some(kind), None) => match kind.as_str() {
            Some("OPEN_BRACKET") => Ok(Token::Open),
            Some("CLOSE_BRACKET") => Ok(Token::Close),
            Some("AND") => Ok(Token::And),
            Some("OR") => Ok(Token::Or),
            _ => Err(QueryError::at(
                QueryErrorCode::LinkedFilterTypeIsInvalid,
                position,
            )),
        },
    }
}

fn check_structure(tokens: &[Token<'_>]) -> QueryResult<()> {
    let opens = tokens.iter().filter(|t| matches!(t, Token::Open)).count();
    let closes = tokens.iter().filter(|t| matches!(t, Token::Close)).count();
    let has_filter = tokens.iter().any(Token::is_filter);

    if !has_filter || opens == 0 || closes == 0 {
        return Err(QueryErrorCode::MustContainFilterSurroundedByBrackets.into());
    }
    if !matches!(tokens.first(), Some(Token::Open)) {
        return Err(QueryError::at(QueryErrorCode::MustStartWithOpenBracket, 0));
    }
    if !matches!(tokens.last(), Some(Token::Close)) {
        return Err(QueryError::at(
            QueryErrorCode::MustEndWithCloseBracket,
            tokens.len() - 1,
        ));
    }
    if opens != closes {
        return Err(QueryErrorCode::BracketCountsMustMatch.into());
    }

    let mut depth: usize = 0;
    for (i, token) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
        let next = tokens.get(i + 1);

        match token {
            Token::Filter(_) => {
                if !matches!(prev, Some(Token::Open | Token::And | Token::Or)) {
                    return Err(QueryError::at(
                        QueryErrorCode::FilterMustBePrecededByBracketOrConnective,
                        i,
                    ));
                }
                if !matches!(next, Some(Token::Close | Token::And | Token::Or)) {
                    return Err(QueryError::at(
                        QueryErrorCode::FilterMustBeFollowedByBracketOrConnective,
                        i,
                    ));
                }
            }
            Token::And | Token::Or => {
                if !matches!(prev, Some(Token::Filter(_) | Token::Close)) {
                    return Err(QueryError::at(
                        QueryErrorCode::ConnectiveMustFollowFilterOrCloseBracket,
                        i,
                    ));
                }
                if !matches!(next, Some(Token::Filter(_) | Token::Open)) {
                    return Err(QueryError::at(
                        QueryErrorCode::ConnectiveMustPrecedeFilterOrOpenBracket,
                        i,
                    ));
                }
            }
            Token::Close => {
                if prev.map_or(false, |p| p.is_connective() || matches!(p, Token::Open)) {
                    return Err(QueryError::at(
                        QueryErrorCode::CloseBracketCannotFollowOperator,
                        i,
                    ));
                }
                depth = depth.checked_sub(1).ok_or_else(|| {
                    QueryError::at(QueryErrorCode::CloseBracketHasNoMatchingOpenBracket, i)
                })?;
            }
            Token::Open => {
                if let Some(p) = prev {
                    if !matches!(p, Token::Open | Token::And | Token::Or) {
                        return Err(QueryError::at(
                            QueryErrorCode::OpenBracketMustFollowOpenBracketOrConnective,
                            i,
                        ));
                    }
                }
                depth += 1;
            }
        }
    }

    Ok(())
}

/// Validates one wire filter object.
fn parse_filter(object: &Map<String, Value>) -> QueryResult<Filter> {
    let key = object
        .get("key")
        .and_then(Value::as_str)
        .filter(|k| !k.trim().is_empty())
        .ok_or(QueryErrorCode::FilterKeyIsRequired)?;

    let options = FilterOptions::from_flags(object)?;

    let value = object.get("value").filter(|v| !v.is_null());
    let value_type = object.get("value_type").filter(|v| !v.is_null());

    if options.predicate() == Predicate::IsNull {
        if value.is_some() || value_type.is_some() {
            return Err(QueryErrorCode::IsNullCannotBeUsedWithValue.into());
        }
        return Ok(Filter::new(key, None, options));
    }

    let value = value.ok_or(QueryErrorCode::ValueIsRequired)?;
    let value_type = value_type.ok_or(QueryErrorCode::ValueTypeIsRequired)?;
    let value_type = value_type
        .as_str()
        .and_then(ValueType::parse)
        .ok_or(QueryErrorCode::ValueTypeIsInvalid)?;

    let value = FilterValue::from_json(value_type, value)?;
    check_option_operand(options.predicate(), &value)?;

    Ok(Filter::new(key, Some(value), options))
}

fn check_option_operand(predicate: Predicate, value: &FilterValue) -> QueryResult<()> {
    match predicate {
        Predicate::InRange => {
            if value.array_len() != Some(2) {
                return Err(QueryErrorCode::InRangeRequiresArrayOfTwoElements.into());
            }
        }
        Predicate::InArray => {
            if !value.is_array() {
                return Err(QueryErrorCode::InArrayRequiresArrayValue.into());
            }
        }
        Predicate::ArrayContains
        | Predicate::GreaterThan
        | Predicate::GreaterThanOrEqual
        | Predicate::LessThan
        | Predicate::LessThanOrEqual => {
            if value.is_array() {
                return Err(QueryErrorCode::OptionRequiresScalarValue.into());
            }
        }
        Predicate::CaseInsensitive | Predicate::PartialMatch => {
            if value.is_array() {
                return Err(QueryErrorCode::OptionRequiresScalarValue.into());
            }
            if value.value_type() != ValueType::String {
                return Err(QueryErrorCode::OptionRequiresStringValue.into());
            }
        }
        Predicate::Equals | Predicate::IsNull => {}
    }
    Ok(())
}
