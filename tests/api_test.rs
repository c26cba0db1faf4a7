mod common;

use askdb_backend::api::handlers::AppState;
use askdb_backend::api::routes::create_router;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{CannedBackend, TestStores};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn app(backend: CannedBackend) -> (Router, TestStores) {
    let stores = TestStores::new().await;
    let state = AppState {
        registry: stores.registry.clone(),
        schemas: stores.schemas.clone(),
        pipeline: Arc::new(stores.pipeline()),
        backend: Arc::new(backend),
    };
    (create_router(state), stores)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn health_check_responds() {
    let (app, _) = app(CannedBackend::default()).await;
    let (status, body) = send(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn lists_registered_stores() {
    let (app, _) = app(CannedBackend::default()).await;
    let (status, body) = send(app, "GET", "/api/stores", None).await;
    assert_eq!(status, StatusCode::OK);

    let stores = body["stores"].as_array().unwrap();
    assert_eq!(stores.len(), 2);
    assert_eq!(stores[0]["name"], json!("lms_db"));
    assert_eq!(stores[0]["kind"], json!("document"));
    assert_eq!(stores[1]["name"], json!("students_db"));
    assert_eq!(stores[1]["schema_cached"], json!(true));
}

#[tokio::test]
async fn unknown_store_is_not_found() {
    let (app, _) = app(CannedBackend::default()).await;
    let (status, body) = send(app, "GET", "/api/stores/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn ask_returns_rows_from_routed_store() {
    let prompt = "find all students older than 20";
    let backend = CannedBackend::default().reply(prompt, "SELECT name FROM students WHERE age > 20 ORDER BY id");
    let (app, _) = app(backend).await;

    let (status, body) = send(app, "POST", "/api/ask", Some(json!({ "prompt": prompt }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], json!("students_db"));
    assert_eq!(body["row_count"], json!(2));
    assert_eq!(body["rows"][0]["name"], json!("Ada"));
}

#[tokio::test]
async fn ask_with_empty_prompt_is_bad_request() {
    let (app, _) = app(CannedBackend::default()).await;
    let (status, body) = send(app, "POST", "/api/ask", Some(json!({ "prompt": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn rejected_query_is_unprocessable() {
    let backend = CannedBackend::default().reply("students", "DELETE FROM students");
    let (app, _) = app(backend).await;

    let (status, body) = send(app, "POST", "/api/ask", Some(json!({ "prompt": "students" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], json!("QUERY_REJECTED"));
}

#[tokio::test]
async fn route_endpoint_explains_decision() {
    let (app, _) = app(CannedBackend::default()).await;
    let (status, body) = send(
        app,
        "POST",
        "/api/route",
        Some(json!({ "prompt": "add a new course titled Go Basics" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], json!("lms_db"));
    assert_eq!(body["kind"], json!("document"));
    assert_eq!(body["keywords"], json!(["course", "titled", "go", "basics"]));
}

#[tokio::test]
async fn schemas_can_be_cleared_and_refreshed() {
    let (app, stores) = app(CannedBackend::default()).await;

    let (status, body) = send(app.clone(), "GET", "/api/schemas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["aggregated"].as_str().unwrap().contains("# Database: students_db"));

    let (status, body) = send(app.clone(), "DELETE", "/api/schemas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], json!(2));
    assert_eq!(stores.cache.size(), 0);

    let (status, body) = send(app.clone(), "POST", "/api/schemas/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refreshed"].as_array().unwrap().len(), 2);
    assert!(body["failed"].as_array().unwrap().is_empty());
    assert_eq!(stores.cache.size(), 2);

    let (status, body) = send(app, "POST", "/api/schemas/lms_db/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["schema"].as_str().unwrap().starts_with("courses("));
}

#[tokio::test]
async fn single_schema_can_be_evicted() {
    let (app, stores) = app(CannedBackend::default()).await;

    let (status, body) = send(app.clone(), "DELETE", "/api/schemas/students_db", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evicted"], json!(true));
    assert!(!stores.cache.contains("students_db"));
    assert!(stores.cache.contains("lms_db"));

    let (status, body) = send(app.clone(), "DELETE", "/api/schemas/students_db", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evicted"], json!(false));

    let (status, _) = send(app, "DELETE", "/api/schemas/ghost_db", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
