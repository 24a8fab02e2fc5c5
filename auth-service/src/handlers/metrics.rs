use service_core::axum::{extract::State, response::IntoResponse};

use crate::AppState;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    crate::services::metrics::render(state.metrics_handle.as_ref())
}
