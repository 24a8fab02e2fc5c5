use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use service_core::{
    axum::{async_trait, extract::FromRequestParts, http::request::Parts},
    error::AppError,
};

use chrono::{DateTime, Utc};

use crate::{models::TenantContext, services::AuthError, AppState};

/// Bearer token from the `Authorization` header, if any well-formed one exists.
pub async fn bearer_token<S>(parts: &mut Parts, state: &S) -> Option<String>
where
    S: Send + Sync,
{
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

/// Caller resolved from a verified access token and its live session.
/// Resolving it slides the session expiry.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub context: TenantContext,
    /// Session expiry after the slide.
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await.ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

        let deadline = state.auth_service.deadline();
        state
            .auth_service
            .introspect(&token, deadline)
            .await
            .map(|session| AuthenticatedSession {
                context: session.context(),
                expires_at: session.expires_at,
            })
            .map_err(|e: AuthError| e.into())
    }
}
