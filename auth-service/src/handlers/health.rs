use service_core::axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::AppState;

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is up")),
    tag = "Observability"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": state.config.service_version,
    }))
}

/// Readiness check: relational store and session store reachable
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Ready to serve"),
        (status = 503, description = "A dependency is unreachable")
    ),
    tag = "Observability"
)]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.auth_service.readiness().await;
    let up = |ok: bool| if ok { "up" } else { "down" };

    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        tracing::warn!(
            database = report.database,
            session_store = report.session_store,
            "Readiness check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if report.is_ready() { "ready" } else { "not_ready" },
            "checks": {
                "database": up(report.database),
                "session_store": up(report.session_store),
            }
        })),
    )
}
