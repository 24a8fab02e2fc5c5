//! Session storage over the shared fast key-value store.
//!
//! Layout:
//! - `session:{id}` hash with the session fields, timestamps in epoch millis,
//!   expiring at `expires_at` through `PEXPIREAT`.
//! - `user_sessions:{tenant}:{user}` set of live session ids for bulk revocation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use redis::{aio::ConnectionManager, Script};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Role, Session, SessionId, TenantId};

const SESSION_PREFIX: &str = "session:";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        role: Role,
        ttl: Duration,
    ) -> Result<Session, SessionStoreError>;

    /// `None` for unknown, deleted and expired sessions alike.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionStoreError>;

    /// Slide expiry to `now + ttl`, never past the absolute lifetime cap and
    /// never backwards.
    async fn touch(&self, id: &SessionId, ttl: Duration)
        -> Result<Option<Session>, SessionStoreError>;

    /// Idempotent.
    async fn delete(&self, id: &SessionId) -> Result<(), SessionStoreError>;

    /// Revoke every session of one user. Returns how many were removed.
    async fn delete_all_for_user(
        &self,
        tenant: TenantId,
        user_id: Uuid,
    ) -> Result<u64, SessionStoreError>;

    async fn health_check(&self) -> Result<(), SessionStoreError>;
}

fn session_key(id: &SessionId) -> String {
    format!("{}{}", SESSION_PREFIX, id.as_str())
}

fn user_index_key(tenant: TenantId, user_id: Uuid) -> String {
    format!("user_sessions:{}:{}", tenant, user_id)
}

fn capped_expiry(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    ttl: Duration,
    max_lifetime: Duration,
) -> DateTime<Utc> {
    (now + ttl).min(created_at + max_lifetime)
}

const TOUCH_SCRIPT: &str = r#"
local created = tonumber(redis.call('HGET', KEYS[1], 'created_at'))
local current = tonumber(redis.call('HGET', KEYS[1], 'expires_at'))
if not created or not current then
  return {}
end
local now = tonumber(ARGV[1])
if current <= now then
  return {}
end
local target = now + tonumber(ARGV[2])
local cap = created + tonumber(ARGV[3])
if target > cap then target = cap end
if target < current then target = current end
redis.call('HSET', KEYS[1], 'expires_at', target, 'last_seen_at', now)
redis.call('PEXPIREAT', KEYS[1], target)
return redis.call('HGETALL', KEYS[1])
"#;

const DELETE_SCRIPT: &str = r#"
local owner = redis.call('HMGET', KEYS[1], 'tenant_id', 'user_id')
redis.call('DEL', KEYS[1])
if owner[1] and owner[2] then
  redis.call('SREM', 'user_sessions:' .. owner[1] .. ':' .. owner[2], ARGV[1])
end
return 1
"#;

const DELETE_ALL_SCRIPT: &str = r#"
local ids = redis.call('SMEMBERS', KEYS[1])
local removed = 0
for _, id in ipairs(ids) do
  removed = removed + redis.call('DEL', ARGV[1] .. id)
end
redis.call('DEL', KEYS[1])
return removed
"#;

pub struct RedisSessionStore {
    conn: ConnectionManager,
    max_lifetime: Duration,
    touch: Script,
    delete: Script,
    delete_all: Script,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, max_lifetime: Duration) -> Self {
        Self {
            conn,
            max_lifetime,
            touch: Script::new(TOUCH_SCRIPT),
            delete: Script::new(DELETE_SCRIPT),
            delete_all: Script::new(DELETE_ALL_SCRIPT),
        }
    }

    fn decode(id: &SessionId, fields: HashMap<String, String>) -> Result<Option<Session>, SessionStoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| SessionStoreError::Corrupt(format!("missing field {}", name)))
        };
        let millis = |name: &str| -> Result<DateTime<Utc>, SessionStoreError> {
            let raw: i64 = field(name)?
                .parse()
                .map_err(|_| SessionStoreError::Corrupt(format!("bad timestamp in {}", name)))?;
            Utc.timestamp_millis_opt(raw)
                .single()
                .ok_or_else(|| SessionStoreError::Corrupt(format!("out of range {}", name)))
        };

        let tenant_id = field("tenant_id")?
            .parse::<TenantId>()
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let user_id = Uuid::parse_str(field("user_id")?)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let role = field("role")?
            .parse::<Role>()
            .map_err(SessionStoreError::Corrupt)?;

        let session = Session {
            session_id: id.clone(),
            tenant_id,
            user_id,
            role,
            created_at: millis("created_at")?,
            expires_at: millis("expires_at")?,
            last_seen_at: millis("last_seen_at")?,
        };

        // PEXPIREAT and the clock may disagree by a few millis; never hand out a
        // session past its own expiry.
        if session.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        role: Role,
        ttl: Duration,
    ) -> Result<Session, SessionStoreError> {
        let now = Utc::now();
        let session = Session {
            session_id: SessionId::generate(),
            tenant_id: tenant,
            user_id,
            role,
            created_at: now,
            expires_at: capped_expiry(now, now, ttl, self.max_lifetime),
            last_seen_at: now,
        };

        let key = session_key(&session.session_id);
        let index = user_index_key(tenant, user_id);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("tenant_id")
            .arg(tenant.to_string())
            .arg("user_id")
            .arg(user_id.to_string())
            .arg("role")
            .arg(role.as_str())
            .arg("created_at")
            .arg(session.created_at.timestamp_millis())
            .arg("expires_at")
            .arg(session.expires_at.timestamp_millis())
            .arg("last_seen_at")
            .arg(session.last_seen_at.timestamp_millis())
            .ignore()
            .cmd("PEXPIREAT")
            .arg(&key)
            .arg(session.expires_at.timestamp_millis())
            .ignore()
            .cmd("SADD")
            .arg(&index)
            .arg(session.session_id.as_str())
            .ignore()
            .cmd("EXPIRE")
            .arg(&index)
            .arg(self.max_lifetime.num_seconds())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        tracing::debug!(tenant_id = %tenant, user_id = %user_id, "Session created");
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(session_key(id))
            .query_async(&mut conn)
            .await?;
        Self::decode(id, fields)
    }

    async fn touch(
        &self,
        id: &SessionId,
        ttl: Duration,
    ) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = self
            .touch
            .key(session_key(id))
            .arg(Utc::now().timestamp_millis())
            .arg(ttl.num_milliseconds())
            .arg(self.max_lifetime.num_milliseconds())
            .invoke_async(&mut conn)
            .await?;
        Self::decode(id, fields)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionStoreError> {
        let mut conn = self.conn.clone();
        self.delete
            .key(session_key(id))
            .arg(id.as_str())
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_all_for_user(
        &self,
        tenant: TenantId,
        user_id: Uuid,
    ) -> Result<u64, SessionStoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .delete_all
            .key(user_index_key(tenant, user_id))
            .arg(SESSION_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), SessionStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

/// Process-local store with the same expiry rules, for tests and local runs.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    max_lifetime: Duration,
}

impl InMemorySessionStore {
    pub fn new(max_lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_lifetime,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Session>>, SessionStoreError> {
        self.sessions
            .lock()
            .map_err(|e| SessionStoreError::Corrupt(format!("session store mutex poisoned: {}", e)))
    }

    fn live(sessions: &mut HashMap<SessionId, Session>, id: &SessionId) -> Option<Session> {
        let expired = sessions.get(id)?.is_expired_at(Utc::now());
        if expired {
            sessions.remove(id);
            return None;
        }
        sessions.get(id).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        role: Role,
        ttl: Duration,
    ) -> Result<Session, SessionStoreError> {
        let now = Utc::now();
        let session = Session {
            session_id: SessionId::generate(),
            tenant_id: tenant,
            user_id,
            role,
            created_at: now,
            expires_at: capped_expiry(now, now, ttl, self.max_lifetime),
            last_seen_at: now,
        };
        self.lock()?
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionStoreError> {
        Ok(Self::live(&mut *self.lock()?, id))
    }

    async fn touch(
        &self,
        id: &SessionId,
        ttl: Duration,
    ) -> Result<Option<Session>, SessionStoreError> {
        let mut sessions = self.lock()?;
        if Self::live(&mut sessions, id).is_none() {
            return Ok(None);
        }
        let now = Utc::now();
        Ok(sessions.get_mut(id).map(|session| {
            let target = capped_expiry(session.created_at, now, ttl, self.max_lifetime);
            session.expires_at = session.expires_at.max(target);
            session.last_seen_at = now;
            session.clone()
        }))
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionStoreError> {
        self.lock()?.remove(id);
        Ok(())
    }

    async fn delete_all_for_user(
        &self,
        tenant: TenantId,
        user_id: Uuid,
    ) -> Result<u64, SessionStoreError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !(s.tenant_id == tenant && s.user_id == user_id));
        Ok((before - sessions.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), SessionStoreError> {
        Ok(())
    }
}
