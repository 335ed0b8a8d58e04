//! End-to-end tests of the HTTP surface over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use car_svc::http_server::{build_router, AppState, BuildInfo, HttpServerConfig};
use car_svc::schema::{SchemaLoader, SchemaValidator};
use car_svc::store::{
    CarCreate, CarDelete, CarRead, CarStore, CarUpdate, CarsSearch, MemoryCarStore, Pagination,
    StoreResult,
};

const CARS: &str = "/car-svc/v1/cars";

fn app_with(config: HttpServerConfig) -> Router {
    let validator = SchemaValidator::new(SchemaLoader::embedded().unwrap());
    let state = AppState::new(MemoryCarStore::new_shared(), Arc::new(validator), config);
    build_router(state)
}

fn app() -> Router {
    app_with(HttpServerConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn post_car(brand: &str, model: &str, test: bool) -> Request<Body> {
    Request::post(CARS)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-lc-svc-test", test.to_string())
        .body(Body::from(
            json!({"brand_name": brand, "model_name": model}).to_string(),
        ))
        .unwrap()
}

async fn create(app: &Router, brand: &str, model: &str, test: bool) -> String {
    let response = send(app, post_car(brand, model, test)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    header_str(&response, "location").unwrap().to_string()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn search_uri(tokens: Value) -> String {
    format!("{CARS}?query={}", URL_SAFE_NO_PAD.encode(tokens.to_string()))
}

#[tokio::test]
async fn test_create_then_duplicate_conflicts() {
    let app = app();
    let response = send(&app, post_car("bn", "mn", false)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = header_str(&response, "location").unwrap();
    assert!(Uuid::parse_str(id).is_ok());

    let response = send(&app, post_car("bn", "mn", false)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await, json!([{"message": "OBJECT_ALREADY_EXISTS"}]));
}

#[tokio::test]
async fn test_read_created_car() {
    let app = app();
    let id = create(&app, "bn", "mn", false).await;

    let response = send(&app, get(&format!("{CARS}/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let etag = header_str(&response, "etag").unwrap().to_string();
    let car = body_json(response).await;
    assert_eq!(car["brand_name"], "bn");
    assert_eq!(car["model_name"], "mn");
    assert_eq!(car["car_id"], id.as_str());
    assert_eq!(car["test"], false);
    assert!(car["date_created"].is_string());
    assert!(car.get("date_updated").is_none());

    let request = Request::get(format!("{CARS}/{id}"))
        .header(header::IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_update_bumps_date_updated() {
    let app = app();
    let id = create(&app, "bn", "mn", false).await;

    let request = Request::put(format!("{CARS}/{id}"))
        .header("x-lc-svc-test", "false")
        .body(Body::from(r#"{"model_name":"mn2"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "location"), Some(id.as_str()));

    let car = body_json(send(&app, get(&format!("{CARS}/{id}"))).await).await;
    assert_eq!(car["model_name"], "mn2");
    assert_eq!(car["brand_name"], "bn");
    assert!(car["date_updated"].is_string());
}

#[tokio::test]
async fn test_update_across_test_partition_is_forbidden() {
    let app = app();
    let id = create(&app, "bn", "mn", true).await;

    let request = Request::put(format!("{CARS}/{id}"))
        .header("x-lc-svc-test", "false")
        .body(Body::from(r#"{"model_name":"mn2"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await, json!([{"message": "ACCESS_FORBIDDEN_BY_TEST"}]));

    let request = Request::delete(format!("{CARS}/{id}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_search_partial_match_within_test_partition() {
    let app = app();
    create(&app, "bn", "mn", false).await;
    create(&app, "xbnx", "m2", false).await;
    create(&app, "bn", "mt", true).await;
    create(&app, "other", "o", false).await;

    let uri = search_uri(json!([
        {"type": "OPEN_BRACKET"},
        {"filter": {"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match_string": true}},
        {"type": "CLOSE_BRACKET"}
    ]));
    let response = send(&app, get(&uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-lc-pagination-total"), Some("2"));
    assert_eq!(header_str(&response, "x-lc-pagination-limit"), Some("100"));
    assert_eq!(header_str(&response, "x-lc-pagination-offset"), Some("0"));
    assert_eq!(header_str(&response, "x-lc-pagination-order"), Some("asc"));
    assert!(header_str(&response, "x-lc-pagination-read-timestamp").is_some());

    let cars = body_json(response).await;
    let cars = cars.as_array().unwrap();
    assert_eq!(cars.len(), 2);
    for car in cars {
        assert!(car["brand_name"].as_str().unwrap().contains("bn"));
        assert_eq!(car["test"], false);
    }
}

#[tokio::test]
async fn test_search_accepts_standard_base64_and_legacy_form() {
    let app = app();
    create(&app, "Audi", "A4", false).await;
    create(&app, "BMW", "M3", false).await;

    let tokens = json!([
        {"type": "OPEN_BRACKET"},
        {"filter": {"key": "brand_name", "value": "audi", "value_type": "STRING", "case_insensitive_string": true}},
        {"type": "CLOSE_BRACKET"}
    ]);
    let encoded = STANDARD.encode(tokens.to_string());
    let escaped = encoded.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D");
    let response = send(&app, get(&format!("{CARS}?query={escaped}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let legacy = format!(
        "{CARS}?query=((key=brand_name:value_type=STRING:value=Audi)*(key=brand_name:value_type=STRING:value=BMW))"
    );
    let response = send(&app, get(&legacy)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-lc-pagination-total"), Some("2"));
}

#[tokio::test]
async fn test_search_pages_and_empty_results() {
    let app = app();
    for model in ["m1", "m2", "m3"] {
        create(&app, "bn", model, false).await;
    }

    let response = send(&app, get(&format!("{CARS}?limit=2"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first.as_array().unwrap().len(), 2);

    let response = send(&app, get(&format!("{CARS}?limit=2&offset=2"))).await;
    let second = body_json(response).await;
    assert_eq!(second.as_array().unwrap().len(), 1);
    assert_eq!(second[0]["model_name"], "m3");

    let response = send(&app, get(&format!("{CARS}?limit=0"))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "x-lc-pagination-total"), Some("3"));

    let request = Request::get(CARS)
        .header("x-lc-svc-test", "true")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "x-lc-svc-test"), Some("true"));
}

#[tokio::test]
async fn test_search_rejections() {
    let app = app();

    let uri = search_uri(json!([{"type": "OPEN_BRACKET"}, {"type": "CLOSE_BRACKET"}]));
    let response = send(&app, get(&uri)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await[0]["message"],
        "QUERY_MUST_CONTAIN_AT_LEAST_ONE_FILTER_SURROUNDED_BY_BRACKETS"
    );

    let uri = search_uri(json!([
        {"type": "OPEN_BRACKET"},
        {"filter": {"key": "date_updated", "is_null": true, "value": "x", "value_type": "STRING"}},
        {"type": "CLOSE_BRACKET"}
    ]));
    let response = send(&app, get(&uri)).await;
    assert_eq!(
        body_json(response).await[0]["message"],
        "OPTION_IS_NULL_EXISTS_CANNOT_BE_USED_WITH_VALUE_OR_VALUE_TYPE"
    );

    let response = send(&app, get(&format!("{CARS}?query=!!!!"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get(&format!("{CARS}?limit=1001"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await[0]["message"], "PAGINATION_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_search_filter_options_must_be_known_booleans() {
    let app = app();
    create(&app, "xbnx", "m1", false).await;

    let filters = [
        json!({"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match": true}),
        json!({"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match_string": "yes"}),
    ];
    for filter in filters {
        let uri = search_uri(json!([{"type": "OPEN_BRACKET"}, {"filter": filter}, {"type": "CLOSE_BRACKET"}]));
        let response = send(&app, get(&uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let uri = search_uri(json!([
        {"type": "OPEN_BRACKET"},
        {"filter": {"key": "brand_name", "value": "bn", "value_type": "STRING", "partial_match_string": true}},
        {"type": "CLOSE_BRACKET"}
    ]));
    let response = send(&app, get(&uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await[0]["model_name"], "m1");
}

#[tokio::test]
async fn test_delete_twice() {
    let app = app();
    let id = create(&app, "bn", "mn", false).await;
    let delete = || {
        Request::delete(format!("{CARS}/{id}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&app, delete()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "location"), Some(id.as_str()));

    let response = send(&app, delete()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!([{"message": "Entity not found"}]));
}

#[tokio::test]
async fn test_if_unmodified_since() {
    let app = app();
    let id = create(&app, "bn", "mn", false).await;
    let put = |since: &str| {
        Request::put(format!("{CARS}/{id}"))
            .header("if-unmodified-since", since)
            .body(Body::from(r#"{"brand_name":"bn2"}"#))
            .unwrap()
    };

    let response = send(&app, put("Mon, 01 Jan 2001 00:00:00 GMT")).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(body_json(response).await[0]["message"], "OBJECT_MODIFIED_SINCE");

    let response = send(&app, put("yesterday")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await[0]["message"],
        "INVALID_IF_UNMODIFIED_SINCE_HEADER"
    );

    let response = send(&app, put("Fri, 01 Jan 2100 00:00:00 GMT")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_body_and_id_validation() {
    let app = app();

    let request = Request::post(CARS)
        .body(Body::from(r#"{"brand_name":"bn"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await[0]["field"], "model_name");

    let request = Request::post(CARS).body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::BAD_REQUEST);

    let request = Request::put(format!("{CARS}/"))
        .body(Body::from(r#"{"model_name":"x"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!([{"message": "Missing id in url params"}]));

    let response = send(&app, get(&format!("{CARS}/{}", Uuid::new_v4()))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_check() {
    let app = app_with(HttpServerConfig {
        environment: "dev".to_string(),
        build: BuildInfo {
            build_date: "2024-05-01".to_string(),
            build_number: "42".to_string(),
            commit_id: "abc123".to_string(),
        },
        ..HttpServerConfig::default()
    });

    let response = send(&app, get("/car-svc?health=true")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "build_date": "2024-05-01",
            "build_number": "42",
            "commit_id": "abc123",
            "env": "dev",
            "status": "OK",
            "svc": "car-svc"
        })
    );
}

#[tokio::test]
async fn test_maintenance_mode_spares_health() {
    let app = app_with(HttpServerConfig {
        maintenance_mode: true,
        ..HttpServerConfig::default()
    });

    let request = Request::get(CARS)
        .header("x-lc-correlation-id", "c-1")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header_str(&response, "x-lc-correlation-id"), Some("c-1"));

    let response = send(&app, get(CARS)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(header_str(&response, "x-lc-correlation-id").is_some());

    assert_eq!(send(&app, get("/car-svc?health=true")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_https_redirect_in_cloud() {
    let app = app_with(HttpServerConfig {
        enforce_https: true,
        ..HttpServerConfig::default()
    });

    let request = Request::get(format!("{CARS}?limit=5"))
        .header(header::HOST, "cars.example.com")
        .header("x-forwarded-proto", "http")
        .header("x-request-id", "r-9")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(header_str(&response, "x-lc-correlation-id"), Some("r-9"));
    assert_eq!(
        header_str(&response, "location"),
        Some("https://cars.example.com/car-svc/v1/cars?limit=5")
    );

    let request = Request::get(CARS)
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_ids_and_cache_headers() {
    let app = app();

    let request = Request::get(CARS)
        .header("x-lc-correlation-id", "corr-7")
        .header("x-lc-location-country", "DE")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(header_str(&response, "x-lc-correlation-id"), Some("corr-7"));
    assert_eq!(header_str(&response, "x-lc-location-country"), Some("DE"));
    assert!(header_str(&response, "x-request-id").is_some());
    assert!(header_str(&response, "x-lc-svc-test").is_none());
    assert_eq!(
        header_str(&response, "cache-control"),
        Some("no-cache, no-store, must-revalidate")
    );
}

/// Store whose rows do not match the response schemas and whose writes are slow
struct DriftingStore {
    write_delay: Duration,
}

const OFF_SCHEMA_CAR: &[u8] = br#"{"brand_name":1}"#;

#[async_trait]
impl CarStore for DriftingStore {
    async fn create_car(&self, _request: &CarCreate) -> StoreResult<String> {
        tokio::time::sleep(self.write_delay).await;
        Ok(Uuid::new_v4().to_string())
    }

    async fn read_car(&self, _request: &CarRead) -> StoreResult<Vec<u8>> {
        Ok(OFF_SCHEMA_CAR.to_vec())
    }

    async fn update_car(&self, _request: &CarUpdate) -> StoreResult<()> {
        Ok(())
    }

    async fn delete_car(&self, _request: &CarDelete) -> StoreResult<()> {
        Ok(())
    }

    async fn search_cars(&self, request: &CarsSearch) -> StoreResult<(Vec<u8>, Pagination)> {
        let body = [b"[".as_slice(), OFF_SCHEMA_CAR, b"]"].concat();
        let page = Pagination {
            total: Some(1),
            ..request.pagination.clone()
        };
        Ok((body, page))
    }

    async fn close(&self) {}

    fn backend(&self) -> &'static str {
        "drifting"
    }
}

fn drifting_app(request_timeout: Duration, write_delay: Duration) -> Router {
    let validator = SchemaValidator::new(SchemaLoader::embedded().unwrap());
    let config = HttpServerConfig {
        request_timeout,
        ..HttpServerConfig::default()
    };
    let state = AppState::new(Arc::new(DriftingStore { write_delay }), Arc::new(validator), config);
    build_router(state)
}

#[tokio::test]
async fn test_response_drift_fails_only_integration_tests() {
    let app = drifting_app(Duration::from_secs(5), Duration::ZERO);

    let response = send(&app, get(CARS)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([{"brand_name": 1}]));

    let response = send(&app, get(&format!("{CARS}/{}", Uuid::new_v4()))).await;
    assert_eq!(response.status(), StatusCode::OK);

    for uri in [CARS.to_string(), format!("{CARS}/{}", Uuid::new_v4())] {
        let request = Request::get(uri)
            .header("x-lc-svc-integration-test", "true")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(!body_json(response).await.as_array().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_store_call_past_deadline_times_out() {
    let app = drifting_app(Duration::from_millis(100), Duration::from_secs(2));

    let response = send(&app, post_car("bn", "mn", false)).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await, json!([{"message": "DEADLINE_EXCEEDED"}]));
}
