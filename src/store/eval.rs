//! In-process evaluation of a filter sequence against a car.
//!
//! Semantics follow the SQL the Postgres store renders: AND binds tighter
//! than OR and comparisons with a NULL column are unknown (`None`), which
//! excludes the row just like a SQL WHERE would.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::query::{Bracket, Connective, Filter, FilterValue, LinkedFilter, Predicate};

use super::model::Car;

/// Column value of a car row
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell<'a> {
    Null,
    Bool(bool),
    Text(&'a str),
    Timestamp(DateTime<Utc>),
}

fn cell<'a>(car: &'a Car, key: &str) -> Option<Cell<'a>> {
    Some(match key {
        "car_id" => Cell::Text(&car.car_id),
        "brand_name" => Cell::Text(&car.brand_name),
        "model_name" => Cell::Text(&car.model_name),
        "test" => Cell::Bool(car.test),
        "date_created" => Cell::Timestamp(car.date_created),
        "date_updated" => car.date_updated.map_or(Cell::Null, Cell::Timestamp),
        _ => return None,
    })
}

/// Whether the car satisfies the sequence. Unknown counts as no match.
pub fn matches(sequence: &[LinkedFilter], car: &Car) -> bool {
    if sequence.is_empty() {
        return true;
    }
    let mut cursor = Cursor {
        tokens: sequence,
        pos: 0,
        car,
    };
    cursor.or_expr() == Some(true)
}

struct Cursor<'a> {
    tokens: &'a [LinkedFilter],
    pos: usize,
    car: &'a Car,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a LinkedFilter> {
        self.tokens.get(self.pos)
    }

    fn or_expr(&mut self) -> Option<bool> {
        let mut acc = self.and_expr();
        while self.peek() == Some(&LinkedFilter::Connective(Connective::Or)) {
            self.pos += 1;
            let rhs = self.and_expr();
            acc = or(acc, rhs);
        }
        acc
    }

    fn and_expr(&mut self) -> Option<bool> {
        let mut acc = self.factor();
        while self.peek() == Some(&LinkedFilter::Connective(Connective::And)) {
            self.pos += 1;
            let rhs = self.factor();
            acc = and(acc, rhs);
        }
        acc
    }

    fn factor(&mut self) -> Option<bool> {
        let token = self.peek()?;
        self.pos += 1;
        match token {
            LinkedFilter::Bracket(Bracket::Open) => {
                let inner = self.or_expr();
                if self.peek() == Some(&LinkedFilter::Bracket(Bracket::Close)) {
                    self.pos += 1;
                }
                inner
            }
            LinkedFilter::Filter(filter) => evaluate(filter, self.car),
            _ => None,
        }
    }
}

fn and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// Three-valued result of one filter
fn evaluate(filter: &Filter, car: &Car) -> Option<bool> {
    let cell = cell(car, &filter.key)?;
    let negated = filter.options.negated();
    let predicate = filter.options.predicate();

    if predicate == Predicate::IsNull || filter.value.is_none() {
        return Some((cell == Cell::Null) != negated);
    }
    if cell == Cell::Null {
        return None;
    }
    let value = filter.value.as_ref()?;

    let holds = match predicate {
        Predicate::IsNull => cell == Cell::Null,
        // no array columns on the car table
        Predicate::ArrayContains => return None,
        Predicate::InArray => elements(value).iter().any(|v| compare(cell, v) == Some(Ordering::Equal)),
        Predicate::InRange => {
            let (lo, hi) = value.range_bounds()?;
            let above = compare(cell, &lo)? != Ordering::Less;
            let below = compare(cell, &hi)? != Ordering::Greater;
            above && below
        }
        Predicate::GreaterThan => compare(cell, value)? == Ordering::Greater,
        Predicate::GreaterThanOrEqual => compare(cell, value)? != Ordering::Less,
        Predicate::LessThan => compare(cell, value)? == Ordering::Less,
        Predicate::LessThanOrEqual => compare(cell, value)? != Ordering::Greater,
        Predicate::CaseInsensitive => match (cell, value) {
            (Cell::Text(text), FilterValue::String(s)) => text.to_uppercase() == s.to_uppercase(),
            _ => return None,
        },
        Predicate::PartialMatch => match (cell, value) {
            (Cell::Text(text), FilterValue::String(s)) => text.contains(s.as_str()),
            _ => return None,
        },
        Predicate::Equals => compare(cell, value)? == Ordering::Equal,
    };

    Some(holds != negated)
}

fn elements(value: &FilterValue) -> Vec<FilterValue> {
    match value {
        FilterValue::BoolArray(v) => v.iter().copied().map(FilterValue::Bool).collect(),
        FilterValue::Int64Array(v) => v.iter().copied().map(FilterValue::Int64).collect(),
        FilterValue::Float64Array(v) => v.iter().copied().map(FilterValue::Float64).collect(),
        FilterValue::StringArray(v) => v.iter().cloned().map(FilterValue::String).collect(),
        FilterValue::DatetimeArray(v) => v.iter().copied().map(FilterValue::Datetime).collect(),
        scalar => vec![scalar.clone()],
    }
}

fn compare(cell: Cell<'_>, value: &FilterValue) -> Option<Ordering> {
    match (cell, value) {
        (Cell::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
        (Cell::Text(a), FilterValue::String(b)) => Some(a.cmp(b.as_str())),
        (Cell::Timestamp(a), FilterValue::Datetime(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
