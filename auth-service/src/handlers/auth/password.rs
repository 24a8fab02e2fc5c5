use secrecy::SecretString;
use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{MessageResponse, PasswordResetConfirm, PasswordResetRequest},
        ErrorResponse,
    },
    middleware::GatewayTenant,
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset token
///
/// Answers 202 whether or not the identifier exists.
#[utoipa::path(
    post,
    path = "/password-reset/request",
    request_body = PasswordResetRequest,
    params(("x-tenant-id" = String, Header, description = "Tenant resolved by the gateway")),
    responses(
        (status = 202, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Malformed request or tenant", body = ErrorResponse),
        (status = 503, description = "Dependency unavailable", body = ErrorResponse)
    ),
    tag = "Password Reset"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    GatewayTenant(tenant): GatewayTenant,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .request_password_reset(tenant, &req.identifier, state.auth_service.deadline())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account exists, reset instructions have been sent".to_string(),
        }),
    ))
}

/// Redeem a reset token and set a new secret
#[utoipa::path(
    post,
    path = "/password-reset/reset",
    request_body = PasswordResetConfirm,
    params(("x-tenant-id" = String, Header, description = "Tenant resolved by the gateway")),
    responses(
        (status = 200, description = "Secret updated, all sessions revoked", body = MessageResponse),
        (status = 400, description = "Invalid, expired or consumed token", body = ErrorResponse),
        (status = 503, description = "Dependency unavailable", body = ErrorResponse)
    ),
    tag = "Password Reset"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    GatewayTenant(tenant): GatewayTenant,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    let new_secret = SecretString::new(req.new_secret);
    state
        .auth_service
        .reset_password(tenant, &req.token, &new_secret, state.auth_service.deadline())
        .await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "Password has been reset".to_string(),
        }),
    ))
}
