//! Login credentials stored per tenant.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Role, TenantId};

/// Credential record for one user in one tenant.
///
/// `identifier` is stored lowercased; the same identifier may exist in many
/// tenants and each row is independent.
#[derive(Debug, Clone)]
pub struct UserCredential {
    pub user_id: Uuid,
    pub tenant_id: TenantId,
    pub identifier: String,
    /// Argon2id PHC string (algorithm, params, salt and hash).
    pub secret_hash: String,
    pub role: Role,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserCredential {
    pub fn new(tenant_id: TenantId, identifier: &str, secret_hash: String, role: Role) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            identifier: normalize_identifier(identifier),
            secret_hash,
            role,
            active: true,
            updated_at: Utc::now(),
        }
    }
}

/// Canonical form used for storage and lookups.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Stable, non-reversible handle for an identifier. Used in store keys and
/// audit metadata so raw logins stay out of both.
pub fn identifier_digest(identifier: &str) -> String {
    hex::encode(Sha256::digest(normalize_identifier(identifier).as_bytes()))
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub identifier: String,
    pub secret_hash: String,
    pub role_code: String,
    pub active: bool,
    pub updated_utc: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserCredential {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            tenant_id: TenantId::new(row.tenant_id).map_err(|e| e.to_string())?,
            identifier: row.identifier,
            secret_hash: row.secret_hash,
            role: row.role_code.parse()?,
            active: row.active,
            updated_at: row.updated_utc,
        })
    }
}
