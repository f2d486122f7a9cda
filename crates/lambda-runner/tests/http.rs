//! Runner HTTP protocol tests driven through the router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use lambda_core::protocol::{ErrorBody, ErrorKind, HealthResponse};
use lambda_runner::{ExecutionHost, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

const ECHO: &str = "function entrypoint(data) { return { echo: data }; }";

fn test_router() -> Router {
    build_router(Arc::new(ExecutionHost::new().unwrap()))
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn load(router: &Router, code: &str) -> (StatusCode, Value) {
    let body = serde_json::to_vec(&json!({ "code": code })).unwrap();
    send(router, post("/load", body)).await
}

fn error_of(body: Value) -> ErrorBody {
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn load_then_run_echoes() {
    let router = test_router();

    let (status, body) = load(&router, ECHO).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "loaded"}));

    let (status, body) = send(&router, post("/run", r#"{"message":"hi"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"echo": {"message": "hi"}}));
}

#[tokio::test]
async fn run_before_load_is_400() {
    let router = test_router();
    let (status, body) = send(&router, post("/run", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err = error_of(body);
    assert_eq!(err.kind, ErrorKind::NotLoaded);
    assert_eq!(err.detail, "No code loaded. Call /load first.");
}

#[tokio::test]
async fn missing_code_field_is_400() {
    let router = test_router();
    for body in [r#"{}"#, r#"{"code": 42}"#, "not json"] {
        let (status, body) = send(&router, post("/load", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err = error_of(body);
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.detail, "Missing or invalid 'code' field");
    }
}

#[tokio::test]
async fn broken_source_is_load_failed() {
    let router = test_router();
    let (status, body) = load(&router, "function entrypoint(").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err = error_of(body);
    assert_eq!(err.kind, ErrorKind::LoadFailed);
    assert!(err.detail.starts_with("Error executing code: "));
}

#[tokio::test]
async fn missing_entrypoint_is_load_failed() {
    let router = test_router();
    let (status, body) = load(&router, "const answer = 42;").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err = error_of(body);
    assert_eq!(err.kind, ErrorKind::LoadFailed);
    assert_eq!(err.detail, "Code must define an 'entrypoint(data)' function");
}

#[tokio::test]
async fn user_exception_is_500() {
    let router = test_router();
    load(
        &router,
        "function entrypoint(d) { throw new Error('intentional error from user code'); }",
    )
    .await;

    let (status, body) = send(&router, post("/run", "{}")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err = error_of(body);
    assert_eq!(err.kind, ErrorKind::UserCode);
    assert!(err.detail.starts_with("User code raised an exception: "));
    assert!(err.detail.contains("intentional error from user code"));
}

#[tokio::test]
async fn health_reports_loaded_state() {
    let router = test_router();
    let health = || Request::builder().uri("/healthz").body(Body::empty()).unwrap();

    let (status, body) = send(&router, health()).await;
    assert_eq!(status, StatusCode::OK);
    let resp: HealthResponse = serde_json::from_value(body).unwrap();
    assert_eq!(resp.status, "ok");
    assert!(!resp.loaded);

    load(&router, ECHO).await;
    let (_, body) = send(&router, health()).await;
    let resp: HealthResponse = serde_json::from_value(body).unwrap();
    assert!(resp.loaded);
}

#[tokio::test]
async fn failed_reload_unloads() {
    let router = test_router();
    load(&router, ECHO).await;
    let (status, _) = load(&router, "syntax (").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, post("/run", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(body).kind, ErrorKind::NotLoaded);
}

#[tokio::test]
async fn scalar_payloads_pass_through() {
    let router = test_router();
    load(&router, "function entrypoint(d) { return d; }").await;

    for payload in [json!(1), json!("text"), json!([1, "two", null]), json!(null)] {
        let body = serde_json::to_vec(&payload).unwrap();
        let (status, result) = send(&router, post("/run", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result, payload);
    }
}
