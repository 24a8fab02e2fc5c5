//! Nothing issued in one tenant is usable from another.

mod common;

use axum::http::{Method, StatusCode};
use common::{new_tenant, TestApp, LOGIN_ATTEMPTS};
use serde_json::json;

#[tokio::test]
async fn same_identifier_in_two_tenants_is_two_accounts() {
    let app = TestApp::spawn();
    let north = new_tenant();
    let south = new_tenant();
    let north_user = app.seed_user(north, "alice@shop.test", "north-secret").await;
    let south_user = app.seed_user(south, "alice@shop.test", "south-secret").await;
    assert_ne!(north_user, south_user);

    assert_eq!(
        app.login(south, "alice@shop.test", "north-secret").await.status,
        StatusCode::UNAUTHORIZED
    );

    let (token, _) = app.login_ok(south, "alice@shop.test", "south-secret").await;
    let session = app.get_session(&token).await;
    assert_eq!(session.body["tenant_id"], south.to_string());
    assert_eq!(session.body["user_id"], south_user.to_string());
}

#[tokio::test]
async fn user_of_one_tenant_is_unknown_in_another() {
    let app = TestApp::spawn();
    let north = new_tenant();
    let south = new_tenant();
    app.seed_user(north, "alice@shop.test", "north-secret").await;

    assert_eq!(
        app.login(south, "alice@shop.test", "north-secret").await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn rate_limit_budgets_are_per_tenant() {
    let app = TestApp::spawn();
    let north = new_tenant();
    let south = new_tenant();
    app.seed_user(north, "alice@shop.test", "north-secret").await;
    app.seed_user(south, "alice@shop.test", "south-secret").await;

    for _ in 0..=LOGIN_ATTEMPTS {
        app.login(north, "alice@shop.test", "wrong").await;
    }
    assert_eq!(
        app.login(north, "alice@shop.test", "north-secret").await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    assert_eq!(
        app.login(south, "alice@shop.test", "south-secret").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn reset_token_cannot_cross_tenants() {
    let app = TestApp::spawn();
    let north = new_tenant();
    let south = new_tenant();
    app.seed_user(north, "alice@shop.test", "north-secret").await;
    app.seed_user(south, "alice@shop.test", "south-secret").await;

    app.request(
        Method::POST,
        "/password-reset/request",
        Some(north),
        None,
        Some(json!({ "identifier": "alice@shop.test" })),
    )
    .await;
    let token = app.delivered_token(1).await;

    let crossed = app
        .request(
            Method::POST,
            "/password-reset/reset",
            Some(south),
            None,
            Some(json!({ "token": token, "new_secret": "hijacked-secret" })),
        )
        .await;
    assert_eq!(crossed.status, StatusCode::BAD_REQUEST);

    assert_eq!(
        app.login(south, "alice@shop.test", "south-secret").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn logout_in_one_tenant_leaves_other_sessions() {
    let app = TestApp::spawn();
    let north = new_tenant();
    let south = new_tenant();
    app.seed_user(north, "alice@shop.test", "north-secret").await;
    app.seed_user(south, "alice@shop.test", "south-secret").await;
    let (north_token, _) = app.login_ok(north, "alice@shop.test", "north-secret").await;
    let (south_token, _) = app.login_ok(south, "alice@shop.test", "south-secret").await;

    app.request(Method::POST, "/logout", None, Some(&north_token), None)
        .await;

    assert_eq!(app.get_session(&south_token).await.status, StatusCode::OK);
}
