use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Role;
use crate::services::IssuedAccess;

// Request bodies that carry secrets do not derive Debug.

#[derive(Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 320, message = "Identifier is required"))]
    #[schema(example = "alice@example.com")]
    pub identifier: String,

    #[validate(length(min = 1, max = 1024, message = "Secret is required"))]
    #[schema(example = "correct horse battery staple")]
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Opaque session id; exchange at `/session/refresh` for a new access token.
    pub session_id: String,
    /// Expiry of the access token.
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedAccess> for LoginResponse {
    fn from(access: IssuedAccess) -> Self {
        Self {
            access_token: access.access_token,
            token_type: "Bearer".to_string(),
            session_id: access.session_id.to_string(),
            expires_at: access.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    /// Expiry of the session after this introspection slid it forward.
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(equal = 64, message = "Malformed session id"))]
    pub session_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(length(min = 1, max = 320, message = "Identifier is required"))]
    #[schema(example = "alice@example.com")]
    pub identifier: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, max = 256, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 8, max = 1024, message = "New secret must be at least 8 characters"))]
    #[schema(min_length = 8)]
    pub new_secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "If the account exists, reset instructions have been sent")]
    pub message: String,
}
