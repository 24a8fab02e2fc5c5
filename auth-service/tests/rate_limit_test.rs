//! Login throttling per tenant and identifier.

mod common;

use async_trait::async_trait;
use auth_service::{
    models::AuditAction,
    services::{LoginRateLimiter, RateLimitDecision, RateLimitError, RateLimitKey},
};
use axum::http::{header, StatusCode};
use common::{new_tenant, TestApp, LOGIN_ATTEMPTS};
use std::sync::Arc;

struct UnreachableLimiter;

#[async_trait]
impl LoginRateLimiter for UnreachableLimiter {
    async fn check_and_increment(
        &self,
        _key: &RateLimitKey,
    ) -> Result<RateLimitDecision, RateLimitError> {
        Err(RateLimitError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn sixth_attempt_is_throttled_even_with_correct_secret() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;

    for _ in 0..LOGIN_ATTEMPTS {
        let res = app.login(tenant, "alice@shop.test", "wrong-horse").await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app.login(tenant, "alice@shop.test", "correct-horse").await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res
        .headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("Retry-After header");
    assert!((1..=900).contains(&retry_after));

    assert!(app
        .events
        .events()
        .iter()
        .any(|(_, e)| e.action == AuditAction::LoginRateLimited));
}

#[tokio::test]
async fn budget_is_per_identifier() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    app.seed_user(tenant, "bob@shop.test", "battery-staple").await;

    for _ in 0..=LOGIN_ATTEMPTS {
        app.login(tenant, "alice@shop.test", "wrong-horse").await;
    }

    let bob = app.login(tenant, "bob@shop.test", "battery-staple").await;
    assert_eq!(bob.status, StatusCode::OK);
}

#[tokio::test]
async fn unreachable_limiter_fails_closed() {
    let app = TestApp::spawn_with_limiter(Arc::new(UnreachableLimiter));
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;

    let res = app.login(tenant, "alice@shop.test", "correct-horse").await;

    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(res.body["access_token"].is_null());
}
