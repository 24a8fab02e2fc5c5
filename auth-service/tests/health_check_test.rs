//! Liveness, readiness and metrics endpoints.

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;

#[tokio::test]
async fn health_check_returns_200() {
    let app = TestApp::spawn();

    let res = app.request(Method::GET, "/health", None, None, None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "ok");
    assert_eq!(res.body["service"], "auth-service-test");
}

#[tokio::test]
async fn ready_reports_each_dependency() {
    let app = TestApp::spawn();

    let res = app.request(Method::GET, "/ready", None, None, None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "ready");
    assert_eq!(res.body["checks"]["database"], "up");
    assert_eq!(res.body["checks"]["session_store"], "up");
}

#[tokio::test]
async fn metrics_endpoint_answers_without_recorder() {
    let app = TestApp::spawn();

    let res = app.request(Method::GET, "/metrics", None, None, None).await;

    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::spawn();

    let res = app.request(Method::GET, "/health", None, None, None).await;

    assert!(res.headers.contains_key("x-request-id"));
    assert_eq!(
        res.headers
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
}
