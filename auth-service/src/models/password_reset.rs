//! One-time password reset tokens.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use super::TenantId;

/// Persisted reset token. Only the SHA-256 of the token is stored.
///
/// State machine: issued -> consumed (terminal) or issued -> expired (terminal,
/// evaluated lazily). Superseded tokens are moved straight to consumed.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }

    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }
}

/// Token handed to the notification collaborator. The plaintext exists only here.
#[derive(Debug, Clone)]
pub struct IssuedResetToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of attempting to redeem a reset token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed { tenant_id: TenantId, user_id: Uuid },
    InvalidOrExpired,
    AlreadyConsumed,
}
