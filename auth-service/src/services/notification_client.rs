//! Out-of-band delivery of password reset tokens.
//!
//! The notification service owns the channel (email, SMS, push); this side only
//! hands over the token. Delivery failures never change the reset-request
//! response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Mutex, time::Duration};
use uuid::Uuid;

use crate::models::TenantId;

/// Payload handed to the notifier. Carries the plaintext token, so it has no
/// `Debug` impl and is never logged.
#[derive(Clone, Serialize)]
pub struct ResetDelivery {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub identifier: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset_token(&self, delivery: &ResetDelivery) -> Result<(), anyhow::Error>;
}

/// Posts deliveries to the notification service over HTTP.
#[derive(Clone)]
pub struct HttpResetNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpResetNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build notification client: {}", e))?;

        let endpoint = format!(
            "{}/notifications/password-reset",
            base_url.trim_end_matches('/')
        );
        tracing::info!(endpoint = %endpoint, "Notification client configured");

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ResetNotifier for HttpResetNotifier {
    async fn send_reset_token(&self, delivery: &ResetDelivery) -> Result<(), anyhow::Error> {
        self.client
            .post(&self.endpoint)
            .json(delivery)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| anyhow::anyhow!("Notification service error: {}", e))?;

        tracing::info!(
            tenant_id = %delivery.tenant_id,
            user_id = %delivery.user_id,
            "Password reset token handed to notification service"
        );
        Ok(())
    }
}

/// Records that a delivery would have happened. For local runs without a
/// notification service.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResetNotifier;

#[async_trait]
impl ResetNotifier for LogResetNotifier {
    async fn send_reset_token(&self, delivery: &ResetDelivery) -> Result<(), anyhow::Error> {
        tracing::info!(
            tenant_id = %delivery.tenant_id,
            user_id = %delivery.user_id,
            expires_at = %delivery.expires_at,
            "Password reset token issued (no notification service configured)"
        );
        Ok(())
    }
}

/// Keeps deliveries in memory so tests can read the issued token.
#[derive(Default)]
pub struct InMemoryResetNotifier {
    deliveries: Mutex<Vec<ResetDelivery>>,
    delivered: tokio::sync::Notify,
}

impl InMemoryResetNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<ResetDelivery> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` deliveries have arrived.
    pub async fn wait_for_deliveries(&self, count: usize) -> Vec<ResetDelivery> {
        loop {
            let delivered = self.delivered.notified();
            let deliveries = self.deliveries();
            if deliveries.len() >= count {
                return deliveries;
            }
            delivered.await;
        }
    }
}

#[async_trait]
impl ResetNotifier for InMemoryResetNotifier {
    async fn send_reset_token(&self, delivery: &ResetDelivery) -> Result<(), anyhow::Error> {
        self.deliveries
            .lock()
            .map_err(|e| anyhow::anyhow!("notifier mutex poisoned: {}", e))?
            .push(delivery.clone());
        self.delivered.notify_waiters();
        Ok(())
    }
}
