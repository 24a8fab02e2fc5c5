//! Audit events emitted to the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

/// Security-relevant actions performed by the auth core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    LoginRateLimited,
    SessionRefreshed,
    Logout,
    PasswordResetRequested,
    PasswordResetCompleted,
    PasswordResetRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::LoginRateLimited => "login_rate_limited",
            AuditAction::SessionRefreshed => "session_refreshed",
            AuditAction::Logout => "logout",
            AuditAction::PasswordResetRequested => "password_reset_requested",
            AuditAction::PasswordResetCompleted => "password_reset_completed",
            AuditAction::PasswordResetRejected => "password_reset_rejected",
        }
    }
}

/// Append-only audit record. Ownership passes to the bus once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub actor_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        actor_user_id: Option<Uuid>,
        action: AuditAction,
        resource_type: &str,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant_id,
            actor_user_id,
            action,
            resource_type: resource_type.to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
