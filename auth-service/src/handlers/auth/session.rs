use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use secrecy::SecretString;
use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{LoginRequest, LoginResponse, RefreshRequest, SessionResponse},
        ErrorResponse,
    },
    middleware::{AuthenticatedSession, GatewayTenant},
    models::SessionId,
    services::AuthError,
    utils::ValidatedJson,
    AppState,
};

/// Verify credentials and open a session
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    params(("x-tenant-id" = String, Header, description = "Tenant resolved by the gateway")),
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Malformed request or tenant", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Too many attempts, see Retry-After", body = ErrorResponse),
        (status = 503, description = "Dependency unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    GatewayTenant(tenant): GatewayTenant,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let secret = SecretString::new(req.secret);
    let access = state
        .auth_service
        .login(tenant, &req.identifier, &secret, state.auth_service.deadline())
        .await?;
    Ok((StatusCode::OK, Json(LoginResponse::from(access))))
}

/// Introspect the session behind the bearer token
#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Session is live", body = SessionResponse),
        (status = 401, description = "Invalid token or revoked session", body = ErrorResponse),
        (status = 503, description = "Dependency unavailable", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn introspect_session(
    AuthenticatedSession {
        context,
        expires_at,
    }: AuthenticatedSession,
) -> Json<SessionResponse> {
    Json(SessionResponse {
        tenant_id: context.tenant_id.as_uuid(),
        user_id: context.user_id,
        role: context.role,
        expires_at,
    })
}

/// Mint a new access token from a live session
#[utoipa::path(
    post,
    path = "/session/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = LoginResponse),
        (status = 401, description = "Session expired or revoked", body = ErrorResponse),
        (status = 503, description = "Dependency unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh_session(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id: SessionId = req
        .session_id
        .parse()
        .map_err(|e: String| AppError::from(AuthError::Validation(e)))?;
    let access = state
        .auth_service
        .refresh(&session_id, state.auth_service.deadline())
        .await?;
    Ok((StatusCode::OK, Json(LoginResponse::from(access))))
}

/// Revoke the session named by the bearer token
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Session revoked or already gone"),
        (status = 503, description = "Session store unavailable", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<StatusCode, AppError> {
    let token = bearer.map(|TypedHeader(Authorization(b))| b.token().to_string());
    state
        .auth_service
        .logout(token.as_deref(), state.auth_service.deadline())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
