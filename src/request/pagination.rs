//! Pagination from `X-Lc-Pagination-*` headers and query parameters.
//!
//! Headers give the base page; `limit`, `offset`, `order` and `cursor`
//! query parameters override them field by field.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::query::format_datetime;
use crate::store::{Pagination, SortOrder, MAX_LIMIT};

use super::errors::{RequestError, RequestResult};

pub const X_LC_PAGINATION_LIMIT: &str = "x-lc-pagination-limit";
pub const X_LC_PAGINATION_OFFSET: &str = "x-lc-pagination-offset";
pub const X_LC_PAGINATION_ORDER: &str = "x-lc-pagination-order";
pub const X_LC_PAGINATION_CURSOR: &str = "x-lc-pagination-cursor";
pub const X_LC_PAGINATION_READ_TIMESTAMP: &str = "x-lc-pagination-read-timestamp";
pub const X_LC_PAGINATION_TOTAL: &str = "x-lc-pagination-total";

/// Builds the requested page from headers, then query parameters.
pub fn parse_pagination(headers: &HeaderMap, params: &[(String, String)]) -> RequestResult<Pagination> {
    let param = |name: &str| {
        params
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let pick = |param_name: &str, header_name: &str| {
        param(param_name)
            .or_else(|| header(header_name))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let mut page = Pagination::default();

    if let Some(limit) = pick("limit", X_LC_PAGINATION_LIMIT) {
        let limit: u32 = limit.parse().map_err(|_| RequestError::InvalidPaginationLimit)?;
        if limit > MAX_LIMIT {
            return Err(RequestError::PaginationLimitExceeded);
        }
        page.limit = limit;
    }
    if let Some(offset) = pick("offset", X_LC_PAGINATION_OFFSET) {
        page.offset = offset.parse().map_err(|_| RequestError::InvalidPaginationOffset)?;
    }
    if let Some(order) = pick("order", X_LC_PAGINATION_ORDER) {
        page.order = SortOrder::parse(order).ok_or(RequestError::InvalidPaginationOrder)?;
    }
    if let Some(cursor) = pick("cursor", X_LC_PAGINATION_CURSOR) {
        page.cursor = cursor.to_string();
    }

    Ok(page)
}

/// Response headers describing a served page
pub fn pagination_headers(page: &Pagination) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };

    put(X_LC_PAGINATION_LIMIT, page.limit.to_string());
    put(X_LC_PAGINATION_OFFSET, page.offset.to_string());
    put(X_LC_PAGINATION_ORDER, page.order.as_str().to_string());
    put(X_LC_PAGINATION_CURSOR, page.cursor.clone());
    if let Some(ref read_timestamp) = page.read_timestamp {
        put(X_LC_PAGINATION_READ_TIMESTAMP, format_datetime(read_timestamp));
    }
    if let Some(total) = page.total {
        put(X_LC_PAGINATION_TOTAL, total.to_string());
    }

    headers
}
