//! # WHERE Clause Synthesis
//!
//! Renders a validated filter sequence into PostgreSQL text with named
//! parameters. Each filter at sequence index `i` over column `c` binds
//! `__PARAM__<i>_<c>` (range bounds add `_start` and `_end`). The text uses
//! `@name` markers which [`WhereClause::to_positional`] rewrites to `$n`.

use std::sync::OnceLock;

use regex::Regex;

use crate::query::{
    filters_of, Bracket, Connective, Filter, FilterValue, LinkedFilter, Predicate, QueryError,
    QueryErrorCode, QueryResult, ValueType,
};

const PARAM_PREFIX: &str = "__PARAM__";

/// SQL type of a car column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    Text,
    Timestamp,
}

impl ColumnType {
    fn value_type(&self) -> ValueType {
        match self {
            ColumnType::Bool => ValueType::Bool,
            ColumnType::Int64 => ValueType::Int64,
            ColumnType::Float64 => ValueType::Float64,
            ColumnType::Text => ValueType::String,
            ColumnType::Timestamp => ValueType::Datetime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub is_array: bool,
}

const fn column(name: &'static str, column_type: ColumnType) -> Column {
    Column {
        name,
        column_type,
        is_array: false,
    }
}

/// Columns of the `car` table
pub const CAR_COLUMNS: [Column; 6] = [
    column("car_id", ColumnType::Text),
    column("brand_name", ColumnType::Text),
    column("model_name", ColumnType::Text),
    column("test", ColumnType::Bool),
    column("date_created", ColumnType::Timestamp),
    column("date_updated", ColumnType::Timestamp),
];

/// Looks up a filter key in the car column catalogue
pub fn lookup_column(key: &str) -> Option<&'static Column> {
    CAR_COLUMNS.iter().find(|c| c.name == key)
}

/// Checks every filter of a sequence against the column catalogue.
pub fn check_filters(sequence: &[LinkedFilter]) -> QueryResult<()> {
    for (position, token) in sequence.iter().enumerate() {
        if let LinkedFilter::Filter(filter) = token {
            check_filter(filter).map_err(|code| QueryError::at(code, position))?;
        }
    }
    Ok(())
}

fn check_filter(filter: &Filter) -> Result<(), QueryErrorCode> {
    let column = lookup_column(&filter.key).ok_or(QueryErrorCode::UnknownFilterKey)?;
    let scalar = column.column_type.value_type();
    let predicate = filter.options.predicate();

    if predicate == Predicate::ArrayContains && !column.is_array {
        return Err(QueryErrorCode::ArrayContainsRequiresArrayColumn);
    }

    let Some(ref value) = filter.value else {
        return Ok(());
    };
    let value_type = value.value_type();

    let matches = match predicate {
        Predicate::IsNull => true,
        Predicate::ArrayContains => value_type == scalar,
        Predicate::InArray | Predicate::InRange => {
            value_type.is_array() && value_type.element() == scalar
        }
        _ if column.is_array => value_type.is_array() && value_type.element() == scalar,
        _ => value_type == scalar,
    };

    if matches {
        Ok(())
    } else {
        Err(QueryErrorCode::ValueTypeDoesNotMatchColumn)
    }
}

/// Rendered predicate with its named parameters, in binding order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<(String, FilterValue)>,
}

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// ` WHERE <sql>` or nothing
    pub fn render(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }

    /// Rewrites `@name` markers to `$n`, numbering from `first`, and returns
    /// the values in positional order.
    pub fn to_positional(&self, first: usize) -> (String, Vec<FilterValue>) {
        let mut values = Vec::with_capacity(self.params.len());
        let mut seen: Vec<String> = Vec::new();

        let rendered = self.render();
        let sql = param_marker().replace_all(&rendered, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            let index = match seen.iter().position(|s| s == name) {
                Some(index) => index,
                None => {
                    if let Some((_, value)) = self.params.iter().find(|(n, _)| n == name) {
                        values.push(value.clone());
                    }
                    seen.push(name.to_string());
                    seen.len() - 1
                }
            };
            format!("${}", first + index)
        });

        (sql.into_owned(), values)
    }
}

fn param_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"@(__PARAM__\w+)").unwrap_or_else(|e| panic!("invalid parameter pattern: {e}"))
    })
}

/// Builds the WHERE predicate for a sequence, optionally AND-ed with an
/// initial predicate. Keys and operand types are checked first.
pub fn build_where(initial: Option<&str>, sequence: &[LinkedFilter]) -> QueryResult<WhereClause> {
    check_filters(sequence)?;

    let mut parts = Vec::with_capacity(sequence.len());
    let mut params = Vec::with_capacity(filters_of(sequence).count());

    for (index, token) in sequence.iter().enumerate() {
        let part = match token {
            LinkedFilter::Bracket(Bracket::Open) => "(".to_string(),
            LinkedFilter::Bracket(Bracket::Close) => ")".to_string(),
            LinkedFilter::Connective(Connective::And) => "AND".to_string(),
            LinkedFilter::Connective(Connective::Or) => "OR".to_string(),
            LinkedFilter::Filter(filter) => render_filter(index, filter, &mut params),
        };
        parts.push(part);
    }

    let tree = parts.join(" ");
    let sql = match (initial.filter(|s| !s.trim().is_empty()), tree.is_empty()) {
        (Some(initial), false) => format!("({}) AND ({})", initial, tree),
        (Some(initial), true) => initial.to_string(),
        (None, _) => tree,
    };

    Ok(WhereClause { sql, params })
}

fn render_filter(index: usize, filter: &Filter, params: &mut Vec<(String, FilterValue)>) -> String {
    let col = filter.key.as_str();
    let param = format!("{}{}_{}", PARAM_PREFIX, index, col);
    let negated = filter.options.negated();

    let value = match (filter.options.predicate(), filter.value.as_ref()) {
        (Predicate::IsNull, _) | (_, None) => return is_null(col, negated),
        (_, Some(value)) => value,
    };

    match filter.options.predicate() {
        Predicate::IsNull => is_null(col, negated),
        Predicate::ArrayContains => {
            params.push((param.clone(), value.clone()));
            let op = if negated { "NOT IN" } else { "IN" };
            format!("@{} {} (SELECT UNNEST({}))", param, op, col)
        }
        Predicate::InArray => {
            params.push((param.clone(), value.clone()));
            let op = if negated { "NOT IN" } else { "IN" };
            format!("{} {} (SELECT UNNEST(@{}))", col, op, param)
        }
        Predicate::InRange => {
            let (start, end) = (format!("{}_start", param), format!("{}_end", param));
            if let Some((lo, hi)) = value.range_bounds() {
                params.push((start.clone(), lo));
                params.push((end.clone(), hi));
            }
            if negated {
                format!("({col} < @{start} OR {col} > @{end})")
            } else {
                format!("({col} >= @{start} AND {col} <= @{end})")
            }
        }
        Predicate::GreaterThan => comparison(col, ">", param, value, negated, params),
        Predicate::GreaterThanOrEqual => comparison(col, ">=", param, value, negated, params),
        Predicate::LessThan => comparison(col, "<", param, value, negated, params),
        Predicate::LessThanOrEqual => comparison(col, "<=", param, value, negated, params),
        Predicate::CaseInsensitive => {
            let upper = match value {
                FilterValue::String(s) => FilterValue::String(s.to_uppercase()),
                other => other.clone(),
            };
            params.push((param.clone(), upper));
            let sql = format!("UPPER({}) = UPPER(@{})", col, param);
            negate(sql, negated)
        }
        Predicate::PartialMatch => {
            let pattern = match value {
                FilterValue::String(s) => FilterValue::String(format!("%{}%", escape_like(s))),
                other => other.clone(),
            };
            params.push((param.clone(), pattern));
            let sql = format!("{} LIKE @{}", col, param);
            negate(sql, negated)
        }
        Predicate::Equals => {
            params.push((param.clone(), value.clone()));
            let op = if negated { "!=" } else { "=" };
            format!("{} {} @{}", col, op, param)
        }
    }
}

fn is_null(col: &str, negated: bool) -> String {
    if negated {
        format!("{} IS NOT NULL", col)
    } else {
        format!("{} IS NULL", col)
    }
}

fn comparison(
    col: &str,
    op: &str,
    param: String,
    value: &FilterValue,
    negated: bool,
    params: &mut Vec<(String, FilterValue)>,
) -> String {
    let sql = format!("{} {} @{}", col, op, param);
    params.push((param, value.clone()));
    negate(sql, negated)
}

fn negate(sql: String, negated: bool) -> String {
    if negated {
        format!("NOT ({})", sql)
    } else {
        sql
    }
}

/// Escapes LIKE wildcards with the default `\` escape character
pub fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
