//! Refresh and logout.

mod common;

use auth_service::models::AuditAction;
use axum::http::{Method, StatusCode};
use common::{new_tenant, TestApp};
use serde_json::json;

#[tokio::test]
async fn logout_revokes_the_session() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    let (token, _) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;

    let logout = app
        .request(Method::POST, "/logout", None, Some(&token), None)
        .await;
    assert_eq!(logout.status, StatusCode::NO_CONTENT);

    // The token still verifies but its session is gone.
    let session = app.get_session(&token).await;
    assert_eq!(session.status, StatusCode::UNAUTHORIZED);

    let again = app
        .request(Method::POST, "/logout", None, Some(&token), None)
        .await;
    assert_eq!(again.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn logout_without_usable_token_is_a_no_op() {
    let app = TestApp::spawn();

    let missing = app.request(Method::POST, "/logout", None, None, None).await;
    assert_eq!(missing.status, StatusCode::NO_CONTENT);

    let garbage = app
        .request(Method::POST, "/logout", None, Some("garbage"), None)
        .await;
    assert_eq!(garbage.status, StatusCode::NO_CONTENT);
    assert!(app.events.events().is_empty());
}

#[tokio::test]
async fn logout_only_revokes_its_own_session() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    let (till, _) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;
    let (back_office, _) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;

    app.request(Method::POST, "/logout", None, Some(&till), None)
        .await;

    assert_eq!(app.get_session(&till).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.get_session(&back_office).await.status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_mints_a_working_token_for_the_same_session() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    let (_, session_id) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;

    let res = app
        .request(
            Method::POST,
            "/session/refresh",
            None,
            None,
            Some(json!({ "session_id": session_id })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["session_id"], session_id.as_str());

    let token = res.body["access_token"].as_str().unwrap();
    assert_eq!(app.get_session(token).await.status, StatusCode::OK);
    assert!(app
        .events
        .events()
        .iter()
        .any(|(_, e)| e.action == AuditAction::SessionRefreshed));
}

#[tokio::test]
async fn refresh_after_logout_is_unauthorized() {
    let app = TestApp::spawn();
    let tenant = new_tenant();
    app.seed_user(tenant, "alice@shop.test", "correct-horse").await;
    let (token, session_id) = app.login_ok(tenant, "alice@shop.test", "correct-horse").await;
    app.request(Method::POST, "/logout", None, Some(&token), None)
        .await;

    let res = app
        .request(
            Method::POST,
            "/session/refresh",
            None,
            None,
            Some(json!({ "session_id": session_id })),
        )
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_session_id_is_a_bad_request() {
    let app = TestApp::spawn();

    let res = app
        .request(
            Method::POST,
            "/session/refresh",
            None,
            None,
            Some(json!({ "session_id": "short" })),
        )
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}
