use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

use super::deadline::DeadlineExceeded;

/// Internal reason behind an authentication denial. Logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    InvalidToken,
    SessionRevoked,
    ResetTokenInvalid,
    ResetTokenConsumed,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::SessionRevoked => "session_revoked",
            AuthFailure::ResetTokenInvalid => "reset_token_invalid",
            AuthFailure::ResetTokenConsumed => "reset_token_consumed",
        }
    }

    fn is_reset(&self) -> bool {
        matches!(
            self,
            AuthFailure::ResetTokenInvalid | AuthFailure::ResetTokenConsumed
        )
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome taxonomy of the auth orchestrator.
///
/// Audit emission failures are deliberately absent: they are handled where
/// they happen and never fail the primary operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(anyhow::Error),
}

impl AuthError {
    pub fn dependency<E>(context: &'static str, err: E) -> Self
    where
        E: fmt::Display,
    {
        AuthError::DependencyUnavailable(anyhow::anyhow!("{}: {}", context, err))
    }
}

impl From<DeadlineExceeded> for AuthError {
    fn from(err: DeadlineExceeded) -> Self {
        AuthError::DependencyUnavailable(anyhow::Error::new(err))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::Authentication(reason) => {
                tracing::info!(reason = reason.as_str(), "Authentication denied");
                if reason.is_reset() {
                    AppError::BadRequest(anyhow::anyhow!("Invalid or expired reset token"))
                } else {
                    AppError::Unauthorized(anyhow::anyhow!("Authentication failed"))
                }
            }
            AuthError::RateLimited { retry_after_secs } => AppError::TooManyRequests(
                "Too many login attempts".to_string(),
                Some(retry_after_secs),
            ),
            AuthError::DependencyUnavailable(e) => AppError::ServiceUnavailable(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::{http::StatusCode, response::IntoResponse};

    fn status(err: AuthError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(status(AuthError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(AuthError::Authentication(AuthFailure::SessionRevoked)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(AuthError::Authentication(AuthFailure::ResetTokenConsumed)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(AuthError::RateLimited { retry_after_secs: 9 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(AuthError::dependency("redis", "connection refused")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn denial_body_does_not_leak_reason() {
        let app: AppError = AuthError::Authentication(AuthFailure::InvalidCredentials).into();
        let rendered = app.to_string();
        assert!(!rendered.contains("invalid_credentials"));
    }
}
