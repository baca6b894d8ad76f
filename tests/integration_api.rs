//! API integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pool_stage::api::{self, AppState};
use pool_stage::repository::InMemoryRepositoryFactory;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app() -> Router {
    let state = AppState::new(Arc::new(InMemoryRepositoryFactory::new()));
    api::build_router(state, "/api/v1")
}

fn stage_body() -> Value {
    json!({
        "db_config": {
            "db_name": "load",
            "collection_name": "stores",
            "conn_string": "memory://local",
            "min_pool_size": 1,
            "max_pool_size": 4,
            "idle_timeout": 30,
            "socket_timeout": 5
        },
        "stage_config": {
            "workers_count": 2,
            "workers_to_add": 1,
            "increment_load": 1,
            "producers_count": 1,
            "msg_by_sec": 10,
            "time_to_sleep_secs": 1,
            "time_to_finish_secs": 1,
            "context_time_out_ms": 200,
            "query_timeout_ms": 100
        }
    })
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let req = Request::builder()
        .uri("/api/v1/health")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_run_stage_accepted() {
    let req = post("/api/v1/stages/", stage_body().to_string());

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "running");
    assert!(body["campaign_id"].as_str().is_some());
}

#[tokio::test]
async fn test_run_stage_without_trailing_slash() {
    let req = post("/api/v1/stages", stage_body().to_string());

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_empty_body_lists_every_validation() {
    let req = post("/api/v1/stages/", "{}");

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    let validations = body["validations"].as_array().unwrap();
    assert_eq!(validations.len(), 14);
    assert_eq!(validations[0], "Database' name is required");
}

#[tokio::test]
async fn test_partial_body_reports_missing_fields() {
    let mut body = stage_body();
    body["stage_config"]["msg_by_sec"] = json!(0);
    body["db_config"]["socket_timeout"] = json!(0);

    let response = app().oneshot(post("/api/v1/stages/", body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(
        body["validations"],
        json!(["Socket' timeout is required", "Messages per second is required"])
    );
}

#[tokio::test]
async fn test_malformed_json_is_invalid_request() {
    let req = post("/api/v1/stages/", "{\"db_config\": ");

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let req = post("/stages/", stage_body().to_string());

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
