//! Tenant resolution for routes that run before a session exists.
//!
//! The gateway maps the storefront host to a tenant and forwards it in
//! `x-tenant-id`. Authenticated routes never read this header; their tenant
//! comes from the verified token and session.

use service_core::{
    axum::{async_trait, extract::FromRequestParts, http::request::Parts},
    error::AppError,
};

use crate::models::{TenantError, TenantId};

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant forwarded by the gateway.
#[derive(Debug, Clone, Copy)]
pub struct GatewayTenant(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for GatewayTenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or(TenantError::Missing)
            .and_then(|value| {
                value
                    .to_str()
                    .map_err(|_| TenantError::Invalid("non-ASCII header".to_string()))
            })
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

        raw.parse::<TenantId>()
            .map(GatewayTenant)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
    }
}
