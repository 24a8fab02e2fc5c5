//! Redis-backed session store and login limiter, including their Lua scripts.

mod common;

use auth_service::{
    models::Role,
    services::{
        LoginRateLimiter, RateLimitKey, RateLimitPolicy, RedisLoginRateLimiter, RedisSessionStore,
        SessionStore,
    },
};
use chrono::Duration;
use common::{create_test_redis, new_tenant};
use uuid::Uuid;

#[tokio::test]
#[ignore] // Requires Redis
async fn touch_slides_expiry_up_to_absolute_lifetime() {
    let redis = create_test_redis().await.expect("Failed to connect");
    let store = RedisSessionStore::new(redis.connection(), Duration::seconds(30));
    let session = store
        .create(new_tenant(), Uuid::new_v4(), Role::Manager, Duration::seconds(10))
        .await
        .expect("Failed to create session");

    let touched = store
        .touch(&session.session_id, Duration::minutes(5))
        .await
        .expect("Touch failed")
        .expect("Session missing");
    assert_eq!(
        touched.expires_at.timestamp_millis(),
        session.created_at.timestamp_millis() + 30_000
    );

    // A shorter ttl never moves expiry backwards.
    let again = store
        .touch(&session.session_id, Duration::seconds(1))
        .await
        .expect("Touch failed")
        .expect("Session missing");
    assert_eq!(again.expires_at, touched.expires_at);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn expired_session_is_gone_and_cannot_be_touched() {
    let redis = create_test_redis().await.expect("Failed to connect");
    let store = RedisSessionStore::new(redis.connection(), Duration::hours(12));
    let session = store
        .create(new_tenant(), Uuid::new_v4(), Role::Cashier, Duration::milliseconds(200))
        .await
        .expect("Failed to create session");

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert!(store.get(&session.session_id).await.expect("Get failed").is_none());
    assert!(store
        .touch(&session.session_id, Duration::minutes(5))
        .await
        .expect("Touch failed")
        .is_none());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn delete_removes_session_and_index_entry() {
    let redis = create_test_redis().await.expect("Failed to connect");
    let store = RedisSessionStore::new(redis.connection(), Duration::hours(12));
    let (tenant, user_id) = (new_tenant(), Uuid::new_v4());
    let session = store
        .create(tenant, user_id, Role::Owner, Duration::minutes(5))
        .await
        .expect("Failed to create session");

    store.delete(&session.session_id).await.expect("Delete failed");
    store.delete(&session.session_id).await.expect("Second delete failed");

    assert!(store.get(&session.session_id).await.expect("Get failed").is_none());
    let mut conn = redis.connection();
    let members: Vec<String> = redis::cmd("SMEMBERS")
        .arg(format!("user_sessions:{}:{}", tenant, user_id))
        .query_async(&mut conn)
        .await
        .expect("SMEMBERS failed");
    assert!(!members.contains(&session.session_id.as_str().to_string()));
}

#[tokio::test]
#[ignore] // Requires Redis
async fn delete_all_for_user_spares_other_users_and_tenants() {
    let redis = create_test_redis().await.expect("Failed to connect");
    let store = RedisSessionStore::new(redis.connection(), Duration::hours(12));
    let (tenant, other_tenant) = (new_tenant(), new_tenant());
    let (user_id, other_user) = (Uuid::new_v4(), Uuid::new_v4());

    let mut mine = Vec::new();
    for _ in 0..3 {
        let session = store
            .create(tenant, user_id, Role::Cashier, Duration::minutes(5))
            .await
            .expect("Failed to create session");
        mine.push(session.session_id);
    }
    let neighbour = store
        .create(tenant, other_user, Role::Cashier, Duration::minutes(5))
        .await
        .expect("Failed to create session");
    let same_id_elsewhere = store
        .create(other_tenant, user_id, Role::Cashier, Duration::minutes(5))
        .await
        .expect("Failed to create session");

    assert_eq!(
        store.delete_all_for_user(tenant, user_id).await.expect("Revoke failed"),
        3
    );
    for id in &mine {
        assert!(store.get(id).await.expect("Get failed").is_none());
    }
    assert!(store.get(&neighbour.session_id).await.expect("Get failed").is_some());
    assert!(store
        .get(&same_id_elsewhere.session_id)
        .await
        .expect("Get failed")
        .is_some());

    let mut conn = redis.connection();
    let index_exists: bool = redis::cmd("EXISTS")
        .arg(format!("user_sessions:{}:{}", tenant, user_id))
        .query_async(&mut conn)
        .await
        .expect("EXISTS failed");
    assert!(!index_exists);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn limiter_denies_past_budget_without_growing_counter() {
    let redis = create_test_redis().await.expect("Failed to connect");
    let limiter = RedisLoginRateLimiter::new(
        redis.connection(),
        RateLimitPolicy {
            max_attempts: 5,
            window: std::time::Duration::from_secs(60),
        },
    );
    let tenant = new_tenant();
    let key = RateLimitKey::login(tenant, "alice@shop.test");

    for attempt in 1..=5u32 {
        let decision = limiter.check_and_increment(&key).await.expect("Limiter failed");
        assert!(decision.allowed, "attempt {} should be allowed", attempt);
        assert_eq!(decision.remaining_attempts, 5 - attempt);
    }
    for _ in 0..3 {
        let denied = limiter.check_and_increment(&key).await.expect("Limiter failed");
        assert!(!denied.allowed);
        assert!(denied.retry_after > std::time::Duration::ZERO);
        assert!(denied.retry_after <= std::time::Duration::from_secs(60));
    }

    let mut conn = redis.connection();
    let stored: u32 = redis::cmd("GET")
        .arg(key.as_str())
        .query_async(&mut conn)
        .await
        .expect("GET failed");
    assert_eq!(stored, 5);

    // Budgets are per tenant.
    let elsewhere = RateLimitKey::login(new_tenant(), "alice@shop.test");
    assert!(limiter
        .check_and_increment(&elsewhere)
        .await
        .expect("Limiter failed")
        .allowed);
}
