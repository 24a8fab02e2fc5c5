//! Fixed-window login throttling keyed by tenant and identifier.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{identifier_digest, TenantId};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("rate limit state unavailable: {0}")]
    Unavailable(String),
}

/// Counter key. Combines tenant and identifier so budgets never leak across
/// tenants; the identifier is hashed so raw logins never land in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn login(tenant: TenantId, identifier: &str) -> Self {
        Self(format!(
            "ratelimit:login:{}:{}",
            tenant,
            identifier_digest(identifier)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

#[async_trait]
pub trait LoginRateLimiter: Send + Sync {
    /// Count one attempt against `key` and report whether it is admitted.
    /// Check and increment happen atomically in the backing store.
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
    ) -> Result<RateLimitDecision, RateLimitError>;
}

// Returns {allowed, count, pttl}. The counter is capped at the maximum, so a
// denied attempt never pushes it further.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
local max = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= max then
  local ttl = redis.call('PTTL', KEYS[1])
  if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], window)
    ttl = window
  end
  return {0, current, ttl}
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], window)
end
local ttl = redis.call('PTTL', KEYS[1])
return {1, count, ttl}
"#;

pub struct RedisLoginRateLimiter {
    conn: ConnectionManager,
    policy: RateLimitPolicy,
    script: Script,
}

impl RedisLoginRateLimiter {
    pub fn new(conn: ConnectionManager, policy: RateLimitPolicy) -> Self {
        Self {
            conn,
            policy,
            script: Script::new(CHECK_AND_INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl LoginRateLimiter for RedisLoginRateLimiter {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self.conn.clone();
        let (allowed, count, ttl_ms): (i64, u32, i64) = self
            .script
            .key(key.as_str())
            .arg(self.policy.max_attempts)
            .arg(self.policy.window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        let allowed = allowed == 1;
        Ok(RateLimitDecision {
            allowed,
            remaining_attempts: self.policy.max_attempts.saturating_sub(count),
            retry_after: if allowed {
                Duration::ZERO
            } else {
                Duration::from_millis(ttl_ms.max(0) as u64)
            },
        })
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Process-local limiter with the same fixed-window rules. Reads the tokio
/// clock so tests can drive it with `tokio::time::advance`.
pub struct InMemoryLoginRateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<RateLimitKey, Window>>,
}

impl InMemoryLoginRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LoginRateLimiter for InMemoryLoginRateLimiter {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|e| RateLimitError::Unavailable(format!("mutex poisoned: {}", e)))?;

        let window = windows.entry(key.clone()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.policy.window {
            window.started = now;
            window.count = 0;
        }

        let retry_after = self
            .policy
            .window
            .saturating_sub(now.duration_since(window.started));

        if window.count >= self.policy.max_attempts {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                retry_after,
            });
        }

        window.count += 1;
        Ok(RateLimitDecision {
            allowed: true,
            remaining_attempts: self.policy.max_attempts - window.count,
            retry_after: Duration::ZERO,
        })
    }
}
