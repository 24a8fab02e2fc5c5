//! Best-effort audit emission.
//!
//! The orchestrator hands events to a [`QueuedEventPublisher`], which returns
//! as soon as the event is enqueued. Worker tasks drain the queues into the
//! configured sink. Every key hashes to exactly one worker, so events sharing
//! a key reach the sink in publish order.

use async_trait::async_trait;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use super::metrics::record_audit_failure;
use crate::models::AuditEvent;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("audit queue is full")]
    QueueFull,

    #[error("audit queue is closed")]
    QueueClosed,

    #[error("failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event bus error: {0}")]
    Broker(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` with ordering scope `key`.
    async fn publish(&self, key: &str, event: &AuditEvent) -> Result<(), PublishError>;
}

struct QueuedEvent {
    key: String,
    event: AuditEvent,
}

/// Bounded, per-key ordered queue in front of a slower sink.
pub struct QueuedEventPublisher {
    senders: Vec<mpsc::Sender<QueuedEvent>>,
}

impl QueuedEventPublisher {
    /// Start `workers` drain tasks over `sink`. The tasks exit once the
    /// publisher is dropped and their queues are empty.
    pub fn spawn(
        sink: Arc<dyn EventPublisher>,
        workers: usize,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, mut rx) = mpsc::channel::<QueuedEvent>(capacity);
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                while let Some(queued) = rx.recv().await {
                    if let Err(e) = sink.publish(&queued.key, &queued.event).await {
                        record_audit_failure(queued.event.action.as_str());
                        tracing::error!(
                            worker,
                            error = %e,
                            event_id = %queued.event.event_id,
                            action = queued.event.action.as_str(),
                            "Audit event delivery failed"
                        );
                    }
                }
                tracing::debug!(worker, "Audit worker stopped");
            }));
            senders.push(tx);
        }

        (Self { senders }, handles)
    }

    fn route(&self, key: &str) -> &mpsc::Sender<QueuedEvent> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.senders[(hasher.finish() % self.senders.len() as u64) as usize]
    }
}

#[async_trait]
impl EventPublisher for QueuedEventPublisher {
    async fn publish(&self, key: &str, event: &AuditEvent) -> Result<(), PublishError> {
        self.route(key)
            .try_send(QueuedEvent {
                key: key.to_string(),
                event: event.clone(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PublishError::QueueClosed,
            })
    }
}

/// Sink that writes each event to the structured log under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, key: &str, event: &AuditEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "audit", key = %key, event = %payload, "Audit event");
        Ok(())
    }
}

/// Captures events in memory. Can be switched into a failing mode to stand in
/// for an unreachable bus.
#[derive(Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<(String, AuditEvent)>>,
    failing: AtomicBool,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<(String, AuditEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, key: &str, event: &AuditEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Broker("event bus unreachable".to_string()));
        }
        self.events
            .lock()
            .map_err(|e| PublishError::Broker(format!("mutex poisoned: {}", e)))?
            .push((key.to_string(), event.clone()));
        Ok(())
    }
}
