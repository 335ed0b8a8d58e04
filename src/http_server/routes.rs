//! Car routes
//!
//! Every handler binds its inputs through the request parser, runs the store
//! call under the request deadline and shapes the response. Failures render
//! through [`ServiceError`].

use std::future::Future;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{ErrorItem, ServiceError, ServiceResult};
use crate::request::{pagination_headers, RequestContext};
use crate::schema::{SchemaError, CAR, CARS};
use crate::store::StoreResult;

use super::state::AppState;

pub const CARS_PATH: &str = "/car-svc/v1/cars";

fn application_json() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

/// Create car routes
pub fn car_routes(state: AppState) -> Router {
    Router::new()
        .route(CARS_PATH, post(create_car_handler).get(search_cars_handler))
        // An empty id segment reaches the handlers as a missing id
        .route(
            "/car-svc/v1/cars/",
            get(read_car_handler)
                .put(update_car_handler)
                .delete(delete_car_handler),
        )
        .route(
            "/car-svc/v1/cars/:id",
            get(read_car_handler)
                .put(update_car_handler)
                .delete(delete_car_handler),
        )
        .with_state(state)
}

/// `Location` carries the bare car id
fn location_header(id: &str) -> ServiceResult<[(header::HeaderName, HeaderValue); 1]> {
    let value = HeaderValue::from_str(id)
        .map_err(|e| ServiceError::internal("INVALID_LOCATION").with_source(e))?;
    Ok([(header::LOCATION, value)])
}

/// Runs a store call under the request deadline
async fn within_deadline<T, F>(context: &RequestContext, operation: &'static str, call: F) -> ServiceResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout_at(context.deadline, call).await {
        Ok(result) => result.map_err(|e| ServiceError::from(e).wrap(operation)),
        Err(_) => Err(ServiceError::gateway_timeout("DEADLINE_EXCEEDED").wrap(operation)),
    }
}

/// Checks bytes the store produced against a response schema. Drift fails
/// the request only for integration tests.
fn check_response(state: &AppState, context: &RequestContext, schema: &str, body: &[u8]) -> ServiceResult<()> {
    let checked = serde_json::from_slice::<Value>(body)
        .map_err(|e| SchemaError::malformed_body(schema, e.to_string()))
        .and_then(|document| state.validator().check_content_against_schema(schema, &document));

    let Err(err) = checked else {
        return Ok(());
    };
    if context.integration_test {
        let items: Vec<ErrorItem> = err
            .surfaced_issues()
            .into_iter()
            .map(|issue| ErrorItem::for_field(issue.field.clone(), issue.message.clone()))
            .collect();
        return Err(ServiceError::teapot("RESPONSE_DOES_NOT_MATCH_SCHEMA").with_items(items));
    }
    warn!(schema, error = %err, correlation_id = %context.correlation_id, "response does not match schema");
    Ok(())
}

fn etag_of(body: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(body))
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}

async fn create_car_handler(
    State(state): State<AppState>,
    context: RequestContext,
    body: Bytes,
) -> ServiceResult<Response> {
    let request = state.parser.parse_create_car(&context, &body)?;
    let id = within_deadline(&context, "create car", state.store.create_car(&request)).await?;
    debug!(car_id = %id, test = request.test, "car created");
    Ok((StatusCode::CREATED, location_header(&id)?).into_response())
}

async fn search_cars_handler(
    State(state): State<AppState>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> ServiceResult<Response> {
    let request = state.parser.parse_search_cars(&context, uri.query(), &headers)?;
    let (body, page) = within_deadline(&context, "search cars", state.store.search_cars(&request)).await?;

    let mut response_headers = pagination_headers(&page);
    if body.as_slice() == b"[]" {
        return Ok((StatusCode::NO_CONTENT, response_headers).into_response());
    }
    check_response(&state, &context, CARS, &body)?;
    response_headers.insert(header::CONTENT_TYPE, application_json());
    Ok((StatusCode::OK, response_headers, body).into_response())
}

async fn read_car_handler(
    State(state): State<AppState>,
    context: RequestContext,
    id: Option<Path<String>>,
    headers: HeaderMap,
) -> ServiceResult<Response> {
    let id = id.map(|Path(id)| id);
    let request = state.parser.parse_read_car(&context, id.as_deref())?;
    let body = within_deadline(&context, "read car", state.store.read_car(&request)).await?;
    check_response(&state, &context, CAR, &body)?;

    let etag = etag_of(&body);
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| ServiceError::internal("INVALID_ETAG").with_source(e))?;
    if etag_matches(&headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response());
    }
    Ok((
        StatusCode::OK,
        [(header::ETAG, etag_value), (header::CONTENT_TYPE, application_json())],
        body,
    )
        .into_response())
}

async fn update_car_handler(
    State(state): State<AppState>,
    context: RequestContext,
    id: Option<Path<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServiceResult<Response> {
    let id = id.map(|Path(id)| id);
    let request = state
        .parser
        .parse_update_car(&context, id.as_deref(), &headers, &body)?;
    within_deadline(&context, "update car", state.store.update_car(&request)).await?;
    Ok((StatusCode::NO_CONTENT, location_header(&request.id)?).into_response())
}

async fn delete_car_handler(
    State(state): State<AppState>,
    context: RequestContext,
    id: Option<Path<String>>,
) -> ServiceResult<Response> {
    let id = id.map(|Path(id)| id);
    let request = state.parser.parse_delete_car(&context, id.as_deref())?;
    within_deadline(&context, "delete car", state.store.delete_car(&request)).await?;
    Ok((StatusCode::NO_CONTENT, location_header(&request.id)?).into_response())
}
