//! Tenant identity and the per-request tenant context.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

use super::Role;

/// Identifier of an isolated customer organization.
///
/// Always a non-nil UUID. Every tenant-scoped store operation takes one of
/// these by value, so there is no way to express an unscoped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct TenantId(Uuid);

/// Errors raised while resolving a tenant id from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantError {
    #[error("tenant id is required")]
    Missing,
    #[error("invalid tenant id: {0}")]
    Invalid(String),
}

impl TenantId {
    pub fn new(id: Uuid) -> Result<Self, TenantError> {
        if id.is_nil() {
            return Err(TenantError::Missing);
        }
        Ok(Self(id))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl TryFrom<Uuid> for TenantId {
    type Error = TenantError;

    fn try_from(id: Uuid) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<TenantId> for Uuid {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TenantError::Missing);
        }
        let id = Uuid::parse_str(s).map_err(|e| TenantError::Invalid(e.to_string()))?;
        Self::new(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is calling, on behalf of which tenant. Derived per request from a
/// verified access token plus a live session; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub role: Role,
}
