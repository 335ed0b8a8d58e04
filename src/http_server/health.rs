//! Health check
//!
//! `GET /car-svc?health=true` answers without touching the store.

use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::state::AppState;

pub const SERVICE_NAME: &str = "car-svc";
pub const HEALTH_PATH: &str = "/car-svc";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub build_date: String,
    pub build_number: String,
    pub commit_id: String,
    pub env: String,
    pub status: String,
    pub svc: String,
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    health: Option<String>,
}

/// Whether a request targets the health check
pub fn is_health_check(uri: &Uri) -> bool {
    uri.path() == HEALTH_PATH
        && uri
            .query()
            .map_or(false, |q| q.split('&').any(|pair| pair == "health=true"))
}

pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>, Query(query): Query<HealthQuery>) -> Response {
    if query.health.as_deref() != Some("true") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let build = &state.config.build;
    let response = HealthResponse {
        build_date: build.build_date.clone(),
        build_number: build.build_number.clone(),
        commit_id: build.commit_id.clone(),
        env: state.config.environment.clone(),
        status: "OK".to_string(),
        svc: SERVICE_NAME.to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}
