//! Password reset request and redemption.

mod common;

use auth_service::models::{AuditAction, TenantId};
use axum::http::{Method, StatusCode};
use common::{new_tenant, TestApp};
use serde_json::json;

async fn request_reset(app: &TestApp, tenant: TenantId, identifier: &str) -> StatusCode {
    app.request(
        Method::POST,
        "/password-reset/request",
        Some(tenant),
        None,
        Some(json!({ "identifier": identifier })),
    )
    .await
    .status
}

async fn reset(
    app: &TestApp,
    tenant: TenantId,
    token: &str,
    new_secret: &str,
) -> StatusCode {
    app.request(
        Method::POST,
        "/password-reset/reset",
        Some(tenant),
        None,
        Some(json!({ "token": token, "new_secret": new_secret })),
    )
    .await
    .status
}

#[tokio::test]
async fn unknown_identifier_gets_the_same_answer() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;

    assert_eq!(request_reset(&app, tenant, "alice@shop.test").await, StatusCode::ACCEPTED);
    assert_eq!(request_reset(&app, tenant, "nobody@shop.test").await, StatusCode::ACCEPTED);

    // Only the known identifier produced a delivery.
    app.delivered_token(1).await;
    assert_eq!(app.notifier.deliveries().len(), 1);
}

#[tokio::test]
async fn full_reset_replaces_secret_and_revokes_sessions() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    let (old_token, _) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;

    request_reset(&app, tenant, "alice@shop.test").await;
    let token = app.delivered_token(1).await;

    assert_eq!(reset(&app, tenant, &token, "brand-new-secret").await, StatusCode::OK);

    assert_eq!(app.get_session(&old_token).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.login(tenant, "alice@shop.test", "correct-horse").await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login(tenant, "alice@shop.test", "brand-new-secret").await.status,
        StatusCode::OK
    );
    assert!(app
        .events
        .events()
        .iter()
        .any(|(_, e)| e.action == AuditAction::PasswordResetCompleted));
}

#[tokio::test]
async fn token_is_single_use() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    request_reset(&app, tenant, "alice@shop.test").await;
    let token = app.delivered_token(1).await;

    assert_eq!(reset(&app, tenant, &token, "brand-new-secret").await, StatusCode::OK);
    assert_eq!(
        reset(&app, tenant, &token, "another-secret").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.login(tenant, "alice@shop.test", "brand-new-secret").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn newer_token_invalidates_older_one() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;

    request_reset(&app, tenant, "alice@shop.test").await;
    let first = app.delivered_token(1).await;
    request_reset(&app, tenant, "alice@shop.test").await;
    let second = app.delivered_token(2).await;
    assert_ne!(first, second);

    assert_eq!(reset(&app, tenant, &first, "brand-new-secret").await, StatusCode::BAD_REQUEST);
    assert_eq!(reset(&app, tenant, &second, "brand-new-secret").await, StatusCode::OK);
}

#[tokio::test]
async fn unknown_token_and_short_secret_are_rejected() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    request_reset(&app, tenant, "alice@shop.test").await;
    let token = app.delivered_token(1).await;

    assert_eq!(reset(&app, tenant, "deadbeef", "brand-new-secret").await, StatusCode::BAD_REQUEST);
    assert_eq!(reset(&app, tenant, &token, "short").await, StatusCode::BAD_REQUEST);

    // A rejected short secret leaves the token redeemable.
    assert_eq!(reset(&app, tenant, &token, "brand-new-secret").await, StatusCode::OK);
}
