//! Server-held login sessions.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::{Role, TenantContext, TenantId};

/// Bytes of OS randomness behind every session id.
const SESSION_ID_BYTES: usize = 32;

/// Opaque, unguessable session identifier (256 bits, lowercase hex).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh id from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = String;

    /// Accepts only the exact shape produced by [`SessionId::generate`], so caller
    /// input can never smuggle arbitrary bytes into store keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == SESSION_ID_BYTES * 2
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err("malformed session id".to_string())
        }
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Session ids are bearer credentials; keep them out of debug logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..8.min(self.0.len())])
    }
}

/// Session record owned by the session store.
///
/// `tenant_id` and `user_id` never change after creation. `expires_at` only
/// moves forward, bounded by `created_at + max_lifetime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn context(&self) -> TenantContext {
        TenantContext {
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            role: self.role,
        }
    }
}
