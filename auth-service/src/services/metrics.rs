use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const LOGIN_TOTAL: &str = "auth_login_total";
pub const AUDIT_EMISSION_FAILURES_TOTAL: &str = "auth_audit_emission_failures_total";
pub const RATE_LIMIT_STORE_FAILURES_TOTAL: &str = "auth_rate_limit_store_failures_total";

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, anyhow::Error> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))
}

pub fn record_login(outcome: &'static str) {
    counter!(LOGIN_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_audit_failure(action: &'static str) {
    counter!(AUDIT_EMISSION_FAILURES_TOTAL, "action" => action).increment(1);
}

pub fn record_rate_limit_store_failure() {
    counter!(RATE_LIMIT_STORE_FAILURES_TOTAL).increment(1);
}

pub fn render(handle: Option<&PrometheusHandle>) -> String {
    match handle {
        Some(handle) => handle.render(),
        None => "# Metrics recorder not installed\n".to_string(),
    }
}
