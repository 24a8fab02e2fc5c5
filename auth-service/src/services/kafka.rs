//! Kafka sink for audit events.

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::time::Duration;

use super::events::{EventPublisher, PublishError};
use crate::models::AuditEvent;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str, topic: &str, client_id: &str) -> Result<Self, anyhow::Error> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "10000")
            .create::<FutureProducer>()
            .map_err(|e| anyhow::anyhow!("Failed to create Kafka producer: {}", e))?;

        tracing::info!(topic = %topic, "Kafka audit producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, key: &str, event: &AuditEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);

        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(error, _)| PublishError::Broker(error.to_string()))?;

        Ok(())
    }
}
