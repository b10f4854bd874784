//! Queue consumer: at-least-once delivery into the processor
//!
//! Submissions arrive as JSON envelopes, optionally base64-wrapped by
//! upstream transports. Delivery is at least once; idempotence comes from
//! the processor's dedup by event id, so redelivering a committed event is a
//! cheap no-op. Malformed payloads are acknowledged and dropped, because no
//! amount of redelivery repairs a missing field.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
#[cfg(test)]
use mockall::automock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::LedgerEvent;
use crate::infra::{Disposition, EventProcessor, LedgerError, Result};
use crate::metrics::{metric_names, MetricsRegistry};

/// One delivery from the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: Uuid,
    pub payload: String,
    /// Deliveries so far, including this one
    pub attempts: u32,
}

/// Minimal queue abstraction: pull, ack, nack, dead-letter.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Next message, if any. Pulling increments the delivery attempt count.
    async fn pull(&self) -> Result<Option<QueueMessage>>;

    /// Permanently remove a message.
    async fn ack(&self, message_id: Uuid) -> Result<()>;

    /// Return a message to the queue for redelivery.
    async fn nack(&self, message_id: Uuid) -> Result<()>;

    /// Park a message for manual inspection.
    async fn dead_letter(&self, message_id: Uuid, reason: &str) -> Result<()>;
}

struct MemoryQueueState {
    ready: VecDeque<QueueMessage>,
    in_flight: Vec<QueueMessage>,
    dead: Vec<(QueueMessage, String)>,
}

/// In-process queue for tests and single-node deployments.
pub struct MemoryEventQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryQueueState {
                ready: VecDeque::new(),
                in_flight: Vec::new(),
                dead: Vec::new(),
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn publish(&self, payload: impl Into<String>) -> Uuid {
        let message_id = Uuid::new_v4();
        self.state.lock().await.ready.push_back(QueueMessage {
            message_id,
            payload: payload.into(),
            attempts: 0,
        });
        message_id
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn dead_letters(&self) -> Vec<(QueueMessage, String)> {
        self.state.lock().await.dead.clone()
    }
}

impl Default for MemoryEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn pull(&self) -> Result<Option<QueueMessage>> {
        let mut state = self.state.lock().await;
        if let Some(mut message) = state.ready.pop_front() {
            message.attempts += 1;
            state.in_flight.push(message.clone());
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    async fn ack(&self, message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.retain(|m| m.message_id != message_id);
        Ok(())
    }

    async fn nack(&self, message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.in_flight.iter().position(|m| m.message_id == message_id) {
            let message = state.in_flight.remove(pos);
            state.ready.push_back(message);
        }
        Ok(())
    }

    async fn dead_letter(&self, message_id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.in_flight.iter().position(|m| m.message_id == message_id) {
            let message = state.in_flight.remove(pos);
            state.dead.push((message, reason.to_string()));
        }
        Ok(())
    }
}

/// Decode a queue payload into an event envelope.
///
/// Accepts plain JSON or base64-wrapped JSON. Envelopes may omit `event_id`
/// and `timestamp`; the consumer assigns them so the rest of the pipeline
/// always sees complete events.
pub fn decode_envelope(payload: &str) -> Result<LedgerEvent> {
    let mut value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|_| {
                    LedgerError::MalformedInput(
                        "payload is neither JSON nor base64-wrapped JSON".to_string(),
                    )
                })?;
            serde_json::from_slice(&decoded).map_err(|e| {
                LedgerError::MalformedInput(format!("base64 payload is not valid JSON: {e}"))
            })?
        }
    };

    let object = value.as_object_mut().ok_or_else(|| {
        LedgerError::MalformedInput("envelope must be a JSON object".to_string())
    })?;

    if !object.contains_key("event_id") {
        object.insert(
            "event_id".to_string(),
            serde_json::Value::String(Uuid::new_v4().to_string()),
        );
    }
    if !object.contains_key("timestamp") {
        object.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }

    serde_json::from_value(value)
        .map_err(|e| LedgerError::MalformedInput(format!("invalid envelope: {e}")))
}

/// Consumer tuning
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// Deliveries before a retryable message is dead-lettered
    pub max_attempts: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_attempts: 5,
        }
    }
}

/// Pulls envelopes off the queue and drives them through the processor.
pub struct QueueConsumer {
    queue: Arc<dyn EventQueue>,
    processor: Arc<EventProcessor>,
    config: ConsumerConfig,
    metrics: Arc<MetricsRegistry>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        processor: Arc<EventProcessor>,
        config: ConsumerConfig,
    ) -> Self {
        let metrics = processor.metrics();
        Self {
            queue,
            processor,
            config,
            metrics,
        }
    }

    /// Handle at most one message. Returns true if a message was pulled.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(message) = self.queue.pull().await? else {
            return Ok(false);
        };

        let event = match decode_envelope(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "dropping undecodable payload"
                );
                self.metrics.inc_counter(metric_names::EVENTS_MALFORMED);
                self.queue.ack(message.message_id).await?;
                return Ok(true);
            }
        };

        match self.processor.process(event).await {
            Ok(outcome) => {
                debug!(
                    message_id = %message.message_id,
                    event_id = %outcome.event.event_id,
                    duplicate = outcome.duplicate,
                    "message processed"
                );
                self.metrics.inc_counter(metric_names::CONSUMER_ACKED);
                self.queue.ack(message.message_id).await?;
            }
            Err(e) => self.handle_failure(&message, e).await?,
        }

        Ok(true)
    }

    async fn handle_failure(&self, message: &QueueMessage, error: LedgerError) -> Result<()> {
        match error.disposition() {
            Disposition::Drop => {
                warn!(
                    message_id = %message.message_id,
                    error = %error,
                    "dropping permanently invalid submission"
                );
                self.queue.ack(message.message_id).await
            }
            // Committed; only background repair remains
            Disposition::RetryBackground => {
                self.metrics.inc_counter(metric_names::CONSUMER_ACKED);
                self.queue.ack(message.message_id).await
            }
            Disposition::RetryInternal | Disposition::RetryCaller => {
                if message.attempts >= self.config.max_attempts {
                    error!(
                        message_id = %message.message_id,
                        attempts = message.attempts,
                        error = %error,
                        "delivery budget exhausted, dead-lettering"
                    );
                    self.metrics.inc_counter(metric_names::CONSUMER_DEAD_LETTERED);
                    self.queue
                        .dead_letter(message.message_id, &error.to_string())
                        .await
                } else {
                    warn!(
                        message_id = %message.message_id,
                        attempts = message.attempts,
                        error = %error,
                        "transient failure, returning message for redelivery"
                    );
                    self.metrics.inc_counter(metric_names::CONSUMER_REDELIVERED);
                    self.queue.nack(message.message_id).await
                }
            }
            Disposition::Alert => {
                error!(
                    message_id = %message.message_id,
                    error = %error,
                    "alert-level failure, dead-lettering for operator review"
                );
                self.metrics.inc_counter(metric_names::CONSUMER_DEAD_LETTERED);
                self.queue
                    .dead_letter(message.message_id, &error.to_string())
                    .await
            }
        }
    }

    /// Poll loop. Stops when `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            max_attempts = self.config.max_attempts,
            "queue consumer started"
        );
        loop {
            tokio::select! {
                result = self.run_once() => {
                    match result {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                        Err(e) => {
                            error!(error = %e, "queue operation failed");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue consumer stopping");
                        break;
                    }
                }
            }
        }
    }
}
