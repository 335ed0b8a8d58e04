//! Legacy textual search expressions
//!
//! ```text
//! ((key=brand_name:value_type=STRING:value=Audi)*(key=brand_name:value_type=STRING:value=BMW))+(key=test:value_type=BOOL:value=false)
//! ```
//!
//! `(` and `)` are brackets, `+` is AND, `*` or `|` is OR. A filter is a
//! bracketed `key=...` body of `:`-separated `name=value` pairs; `value=` is
//! always last and runs to the closing bracket. Values are percent-decoded,
//! array values are comma separated. The tokens are translated to the JSON
//! wire form so both forms share one validator.

use percent_encoding::percent_decode_str;
use serde_json::{json, Map, Value};

use super::errors::{QueryError, QueryErrorCode, QueryResult};
use super::filter::{Predicate, ValueType, NOT_CONDITION_FLAG};

const VALUE_SEPARATOR: &str = ":value=";

fn invalid(position: usize) -> QueryError {
    QueryError::at(QueryErrorCode::NotValidLegacyExpression, position)
}

/// Splits a legacy expression into JSON wire tokens.
pub fn to_wire_tokens(raw: &str) -> QueryResult<Vec<Value>> {
    let mut tokens = Vec::new();
    let mut rest = raw.trim();

    while let Some(c) = rest.chars().next() {
        let position = tokens.len();
        match c {
            '(' if rest[1..].starts_with("key=") => {
                let end = rest.find(')').ok_or_else(|| invalid(position))?;
                let body = &rest[1..end];
                tokens.push(json!({"type": "OPEN_BRACKET"}));
                tokens.push(json!({"filter": parse_filter_body(body, position + 1)?}));
                tokens.push(json!({"type": "CLOSE_BRACKET"}));
                rest = &rest[end + 1..];
                continue;
            }
            '(' => tokens.push(json!({"type": "OPEN_BRACKET"})),
            ')' => tokens.push(json!({"type": "CLOSE_BRACKET"})),
            '+' => tokens.push(json!({"type": "AND"})),
            '*' | '|' => tokens.push(json!({"type": "OR"})),
            c if c.is_whitespace() => {}
            _ => return Err(invalid(position)),
        }
        rest = &rest[c.len_utf8()..];
    }

    Ok(tokens)
}

fn decode(part: &str, position: usize) -> QueryResult<String> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| invalid(position))
}

fn parse_filter_body(body: &str, position: usize) -> QueryResult<Value> {
    let (head, raw_value) = match body.split_once(VALUE_SEPARATOR) {
        Some((head, raw)) => (head, Some(raw)),
        None => (body, None),
    };

    let mut filter = Map::new();
    let mut value_type = None;

    for pair in head.split(':').filter(|p| !p.is_empty()) {
        let (name, setting) = pair.split_once('=').ok_or_else(|| invalid(position))?;
        let setting = decode(setting, position)?;
        match name {
            "key" => {
                filter.insert("key".into(), json!(setting));
            }
            "value_type" => {
                value_type = ValueType::parse(&setting);
                filter.insert("value_type".into(), json!(setting));
            }
            flag if is_option_flag(flag) => {
                filter.insert(flag.into(), json!(setting == "true"));
            }
            _ => return Err(invalid(position)),
        }
    }

    if let Some(raw) = raw_value {
        filter.insert("value".into(), typed_value(raw, value_type, position)?);
    }

    Ok(Value::Object(filter))
}

fn is_option_flag(name: &str) -> bool {
    name == NOT_CONDITION_FLAG || Predicate::FLAGGED.iter().any(|p| p.flag() == Some(name))
}

/// Converts a raw value by its declared type. Text that does not convert is
/// kept as a string so the filter validator reports the mismatch.
fn typed_value(raw: &str, value_type: Option<ValueType>, position: usize) -> QueryResult<Value> {
    let Some(value_type) = value_type else {
        return Ok(json!(decode(raw, position)?));
    };

    if value_type.is_array() {
        if raw.is_empty() {
            return Ok(json!([]));
        }
        let items = raw
            .split(',')
            .map(|part| decode(part, position).map(|s| scalar(&s, value_type.element())))
            .collect::<QueryResult<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }

    Ok(scalar(&decode(raw, position)?, value_type))
}

fn scalar(text: &str, value_type: ValueType) -> Value {
    match value_type {
        ValueType::Bool => text.parse::<bool>().map(Value::from).unwrap_or_else(|_| json!(text)),
        ValueType::Int64 => text.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(text)),
        // Integer text stays integral so mixed number arrays are detected
        ValueType::Float64 => match text.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => text
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| json!(text)),
        },
        _ => json!(text),
    }
}
