//! # Request Parser
//!
//! Binds each route's inputs (path, query string, headers, body and the
//! ambient [`RequestContext`]) to the typed request the store consumes.
//! Bodies are checked against their schema before they are decoded.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::debug;

use crate::observability::redact_body;
use crate::query::{decode_document, parse_linked_filters, wire_filters, with_test_conjunction};
use crate::schema::{SchemaValidator, CARS_SEARCH, CAR_CREATE, CAR_UPDATE};
use crate::store::{
    CarCreate, CarDelete, CarInput, CarPatch, CarRead, CarUpdate, CarsSearch, SearchFilters,
};

use super::context::RequestContext;
use super::errors::{RequestError, RequestResult};
use super::pagination::parse_pagination;

pub const IF_UNMODIFIED_SINCE: &str = "if-unmodified-since";

const QUERY_PARAM: &str = "query";

/// Turns HTTP inputs into store requests
#[derive(Debug, Clone)]
pub struct RequestParser {
    validator: Arc<SchemaValidator>,
}

impl RequestParser {
    pub fn new(validator: Arc<SchemaValidator>) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    pub fn parse_create_car(&self, context: &RequestContext, body: &[u8]) -> RequestResult<CarCreate> {
        debug!(body = %redact_body(body), "create car body");
        let document = self.validator.check_body_against_schema(CAR_CREATE, body)?;
        let user_input: CarInput = serde_json::from_value(document).map_err(RequestError::Decode)?;
        Ok(CarCreate {
            user_input,
            test: context.test,
        })
    }

    /// `raw_query` is the undecoded query string of the request URI
    pub fn parse_search_cars(
        &self,
        context: &RequestContext,
        raw_query: Option<&str>,
        headers: &HeaderMap,
    ) -> RequestResult<CarsSearch> {
        let raw_query = raw_query.unwrap_or_default();
        let expression = raw_param(raw_query, QUERY_PARAM).map(query_value).unwrap_or_default();

        // The schema sees the filters as sent, before options are normalized
        let (user_filters, filter_documents) = match decode_document(&expression)? {
            Some(document) => (parse_linked_filters(&document)?, wire_filters(&document)),
            None => (Vec::new(), Vec::new()),
        };
        self.validator
            .check_content_against_schema(CARS_SEARCH, &Value::Array(filter_documents))?;

        let pagination = parse_pagination(headers, &form_pairs(raw_query))?;
        debug!(
            tokens = user_filters.len(),
            limit = pagination.limit,
            offset = pagination.offset,
            "search request"
        );

        Ok(CarsSearch {
            filters: SearchFilters {
                linked_filters: with_test_conjunction(user_filters, context.test),
                test: context.test,
            },
            pagination,
            integration_test: context.integration_test,
        })
    }

    pub fn parse_read_car(&self, context: &RequestContext, id: Option<&str>) -> RequestResult<CarRead> {
        Ok(CarRead {
            id: require_id(id)?,
            test: context.test,
            integration_test: context.integration_test,
        })
    }

    pub fn parse_update_car(
        &self,
        context: &RequestContext,
        id: Option<&str>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> RequestResult<CarUpdate> {
        let id = require_id(id)?;
        debug!(body = %redact_body(body), "update car body");
        let document = self.validator.check_body_against_schema(CAR_UPDATE, body)?;
        let user_input: CarPatch = serde_json::from_value(document).map_err(RequestError::Decode)?;

        let if_unmodified_since = match headers.get(IF_UNMODIFIED_SINCE) {
            None => None,
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| RequestError::InvalidIfUnmodifiedSince)?;
                Some(parse_http_date(value).ok_or(RequestError::InvalidIfUnmodifiedSince)?)
            }
        };

        Ok(CarUpdate {
            id,
            user_input,
            test: context.test,
            if_unmodified_since,
        })
    }

    /// The body of a delete is ignored
    pub fn parse_delete_car(&self, context: &RequestContext, id: Option<&str>) -> RequestResult<CarDelete> {
        Ok(CarDelete {
            id: require_id(id)?,
            test: context.test,
        })
    }
}

fn require_id(id: Option<&str>) -> RequestResult<String> {
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(RequestError::MissingId)
}

/// Value of a parameter exactly as it appears in the query string
fn raw_param<'a>(raw_query: &'a str, name: &str) -> Option<&'a str> {
    raw_query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .last()
}

/// Legacy expressions carry their own percent-encoding and use `+` as AND,
/// so they are passed through untouched. Anything else is percent-decoded
/// with `+` kept, since it is a base64 character.
fn query_value(raw: &str) -> String {
    if raw.trim_start().starts_with('(') {
        raw.to_string()
    } else {
        percent_decode_str(raw).decode_utf8_lossy().into_owned()
    }
}

/// Form-decoded `key=value` pairs
fn form_pairs(raw_query: &str) -> Vec<(String, String)> {
    let decode = |s: &str| {
        percent_decode_str(&s.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned()
    };
    raw_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode(key), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

/// Accepts the RFC 7231 HTTP-date forms plus RFC 3339
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    // RFC 850 and asctime
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{encode_query, Filter, FilterValue, LinkedFilter, QueryErrorCode};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;
    use crate::request::context::DEFAULT_REQUEST_TIMEOUT;
    use crate::schema::SchemaLoader;
    use chrono::TimeZone;

    fn parser() -> RequestParser {
        let loader = SchemaLoader::embedded().unwrap();
        RequestParser::new(Arc::new(SchemaValidator::new(loader)))
    }

    fn context(test: bool) -> RequestContext {
        let mut context = RequestContext::from_headers(&HeaderMap::new(), DEFAULT_REQUEST_TIMEOUT);
        context.test = test;
        context
    }

    #[test]
    fn test_create_attaches_test_flag() {
        let request = parser()
            .parse_create_car(&context(true), br#"{"brand_name":"Audi","model_name":"A4"}"#)
            .unwrap();
        assert_eq!(request.user_input.brand_name, "Audi");
        assert!(request.test);
    }

    #[test]
    fn test_create_rejects_bad_bodies() {
        let err = parser().parse_create_car(&context(false), b"").unwrap_err();
        assert!(matches!(err, RequestError::Schema(_)));

        let err = parser()
            .parse_create_car(&context(false), br#"{"brand_name":"Audi"}"#)
            .unwrap_err();
        match err {
            RequestError::Schema(schema) => {
                assert!(schema.issues().iter().any(|i| i.field == "model_name"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_id() {
        let err = parser().parse_read_car(&context(false), Some("  ")).unwrap_err();
        assert!(matches!(err, RequestError::MissingId));
        let err = parser().parse_delete_car(&context(false), None).unwrap_err();
        assert!(matches!(err, RequestError::MissingId));
    }

    #[test]
    fn test_update_with_if_unmodified_since() {
        let mut headers = HeaderMap::new();
        headers.insert(
            IF_UNMODIFIED_SINCE,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        let request = parser()
            .parse_update_car(&context(false), Some("c1"), &headers, br#"{"model_name":"A5"}"#)
            .unwrap();
        assert_eq!(request.user_input.model_name.as_deref(), Some("A5"));
        assert!(request.user_input.brand_name.is_none());
        assert_eq!(
            request.if_unmodified_since,
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );

        headers.insert(IF_UNMODIFIED_SINCE, "yesterday".parse().unwrap());
        let err = parser()
            .parse_update_car(&context(false), Some("c1"), &headers, br#"{"model_name":"A5"}"#)
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidIfUnmodifiedSince));
    }

    #[test]
    fn test_http_date_forms() {
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date("1994-11-06T08:49:37Z"), Some(expected));
        assert_eq!(parse_http_date("06/11/1994"), None);
    }

    #[test]
    fn test_empty_search_is_test_conjunction() {
        let request = parser()
            .parse_search_cars(&context(true), None, &HeaderMap::new())
            .unwrap();
        assert_eq!(
            request.filters.linked_filters,
            vec![
                LinkedFilter::OPEN,
                LinkedFilter::Filter(Filter::eq("test", FilterValue::Bool(true))),
                LinkedFilter::CLOSE,
            ]
        );
        assert_eq!(request.pagination.limit, 100);
    }

    #[test]
    fn test_search_with_base64_and_pagination() {
        let user = vec![
            LinkedFilter::OPEN,
            LinkedFilter::Filter(Filter::eq("brand_name", FilterValue::String("Audi".into()))),
            LinkedFilter::CLOSE,
        ];
        let raw = format!("query={}&limit=10&order=desc", encode_query(&user));
        let request = parser()
            .parse_search_cars(&context(false), Some(&raw), &HeaderMap::new())
            .unwrap();
        assert_eq!(request.filters.linked_filters.len(), 9);
        assert_eq!(request.pagination.limit, 10);
        assert_eq!(request.pagination.order.as_str(), "desc");
    }

    #[test]
    fn test_search_with_legacy_expression() {
        let raw = "query=(key=brand_name:value_type=STRING:value=Audi)+(key=model_name:value_type=STRING:value=A4)";
        let request = parser()
            .parse_search_cars(&context(false), Some(raw), &HeaderMap::new())
            .unwrap();
        assert_eq!(request.filters.linked_filters[4], LinkedFilter::AND);
    }

    #[test]
    fn test_search_rejects_bad_query() {
        let err = parser()
            .parse_search_cars(&context(false), Some("query=!!!"), &HeaderMap::new())
            .unwrap_err();
        match err {
            RequestError::Query(query) => assert_eq!(query.code, QueryErrorCode::NotValidBase64),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_search_schema_checks_filters_as_sent() {
        let wrap = |filter: Value| {
            let tokens = json!([{"type": "OPEN_BRACKET"}, {"filter": filter}, {"type": "CLOSE_BRACKET"}]);
            format!("query={}", URL_SAFE_NO_PAD.encode(tokens.to_string()))
        };
        let rejected = [
            json!({"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match": true}),
            json!({"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match_string": "yes"}),
        ];
        for filter in rejected {
            let err = parser()
                .parse_search_cars(&context(false), Some(&wrap(filter)), &HeaderMap::new())
                .unwrap_err();
            assert!(matches!(err, RequestError::Schema(_)), "unexpected {:?}", err);
        }

        let accepted = json!({"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match_string": true});
        assert!(parser()
            .parse_search_cars(&context(false), Some(&wrap(accepted)), &HeaderMap::new())
            .is_ok());
    }

    #[test]
    fn test_search_schema_rejects_unknown_key() {
        let user = vec![
            LinkedFilter::OPEN,
            LinkedFilter::Filter(Filter::eq("colour", FilterValue::String("red".into()))),
            LinkedFilter::CLOSE,
        ];
        let raw = format!("query={}", encode_query(&user));
        let err = parser()
            .parse_search_cars(&context(false), Some(&raw), &HeaderMap::new())
            .unwrap_err();
        assert!(matches!(err, RequestError::Schema(_)));
    }
}
