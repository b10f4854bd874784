//! Background repair of failed analytical writes
//!
//! The analytical tier is written after commit and off the hot path. When an
//! insert fails, the committed event is queued here and a worker replays it
//! until it lands or the attempt budget runs out. Inserts are idempotent by
//! event id, so replaying an already-landed write is harmless.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::LedgerEvent;
use crate::infra::traits::AnalyticalStore;
use crate::metrics::{metric_names, MetricsRegistry};

/// A committed event whose analytical insert has not landed yet.
#[derive(Debug, Clone)]
pub struct PendingAnalyticalWrite {
    pub event: LedgerEvent,
    /// Message of the most recent failure
    pub error: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

/// Counters exposed for operational visibility.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileStats {
    pub enqueued: u64,
    pub replayed: u64,
    pub abandoned: u64,
}

/// FIFO queue of pending analytical writes.
pub struct ReconciliationQueue {
    pending: Mutex<VecDeque<PendingAnalyticalWrite>>,
    enqueued: AtomicU64,
    replayed: AtomicU64,
    abandoned: AtomicU64,
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue a committed event for background replay.
    pub async fn enqueue(&self, event: LedgerEvent, error: String) {
        let now = Utc::now();
        warn!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            error = %error,
            "analytical write failed, queued for reconciliation"
        );
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.push_back(PendingAnalyticalWrite {
            event,
            error,
            attempts: 0,
            enqueued_at: now,
            last_attempt_at: now,
        });
    }

    pub async fn depth(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Replay every currently queued write once. Entries that fail again are
    /// requeued until they exceed `max_attempts`, then dropped with an error
    /// log; the durable tier still holds the event, so nothing is lost.
    pub async fn drain_once(
        &self,
        analytical: &dyn AnalyticalStore,
        max_attempts: u32,
    ) -> ReconcileStats {
        let batch: Vec<PendingAnalyticalWrite> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };

        for mut entry in batch {
            entry.attempts += 1;
            entry.last_attempt_at = Utc::now();

            match analytical.insert(&entry.event).await {
                Ok(()) => {
                    self.replayed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        event_id = %entry.event.event_id,
                        attempts = entry.attempts,
                        "analytical write reconciled"
                    );
                }
                Err(e) if entry.attempts >= max_attempts => {
                    self.abandoned.fetch_add(1, Ordering::Relaxed);
                    error!(
                        event_id = %entry.event.event_id,
                        attempts = entry.attempts,
                        error = %e,
                        "analytical write abandoned after attempt budget"
                    );
                }
                Err(e) => {
                    entry.error = e.to_string();
                    self.pending.lock().await.push_back(entry);
                }
            }
        }

        self.stats()
    }
}

impl Default for ReconciliationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic worker draining the reconciliation queue.
pub struct ReconciliationWorker;

impl ReconciliationWorker {
    /// Spawn the drain loop. Stops when `shutdown` flips to true.
    pub fn spawn(
        queue: Arc<ReconciliationQueue>,
        analytical: Arc<dyn AnalyticalStore>,
        metrics: Arc<MetricsRegistry>,
        interval: Duration,
        max_attempts: u32,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis(), "reconciliation worker started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = queue.drain_once(analytical.as_ref(), max_attempts).await;
                        metrics.set_gauge(
                            metric_names::RECONCILE_QUEUE_DEPTH,
                            queue.depth().await as u64,
                        );
                        metrics.set_gauge(metric_names::RECONCILE_REPLAYED, stats.replayed);
                        metrics.set_gauge(metric_names::RECONCILE_ABANDONED, stats.abandoned);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("reconciliation worker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::infra::error::LedgerError;
    use crate::infra::memory::MemoryAnalyticalStore;
    use crate::infra::traits::MockAnalyticalStore;

    #[tokio::test]
    async fn test_drain_replays_into_store() {
        let queue = ReconciliationQueue::new();
        let analytical = MemoryAnalyticalStore::new();

        let event = LedgerEvent::new(EventType::DataIngested);
        queue.enqueue(event.clone(), "warehouse down".into()).await;
        assert_eq!(queue.depth().await, 1);

        let stats = queue.drain_once(&analytical, 3).await;
        assert_eq!(stats.replayed, 1);
        assert_eq!(queue.depth().await, 0);
        assert_eq!(analytical.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_replay_is_requeued() {
        let queue = ReconciliationQueue::new();

        let mut analytical = MockAnalyticalStore::new();
        analytical
            .expect_insert()
            .times(1)
            .returning(|_| Err(LedgerError::AnalyticalWriteFailure("still down".into())));

        queue
            .enqueue(LedgerEvent::new(EventType::MlInference), "down".into())
            .await;
        let stats = queue.drain_once(&analytical, 3).await;

        assert_eq!(stats.replayed, 0);
        assert_eq!(stats.abandoned, 0);
        assert_eq!(queue.depth().await, 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_abandons_entry() {
        let queue = ReconciliationQueue::new();

        let mut analytical = MockAnalyticalStore::new();
        analytical
            .expect_insert()
            .returning(|_| Err(LedgerError::AnalyticalWriteFailure("still down".into())));

        queue
            .enqueue(LedgerEvent::new(EventType::MlInference), "down".into())
            .await;

        queue.drain_once(&analytical, 2).await;
        let stats = queue.drain_once(&analytical, 2).await;

        assert_eq!(stats.abandoned, 1);
        assert_eq!(queue.depth().await, 0);
    }
}
