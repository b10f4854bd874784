//! The event processor: validate, link, sign, persist
//!
//! Every submission walks the same pipeline. The chain tail kept here is a
//! cache of the durable tier's tail, held under a mutex only long enough to
//! read or swap it; the durable tier's conditional append is the arbiter of
//! order. When the append reports a tail conflict the processor refreshes its
//! cache from the store and re-links, a bounded number of times.
//!
//! Commit order per event:
//! 1. validate the envelope (structural defects are permanent failures)
//! 2. link: `previous_hash` = tail snapshot, compute `event_hash`
//! 3. sign the hash when the event type is critical
//! 4. append to the durable tier conditionally, realtime write in parallel
//! 5. advance the cached tail, schedule the analytical write
//!
//! A critical event is never submitted to the durable tier unsigned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::crypto::compute_event_hash;
use crate::domain::{EventCategory, EventType, LedgerEvent, ProcessingStage};
use crate::infra::error::{LedgerError, Result};
use crate::infra::reconcile::ReconciliationQueue;
use crate::infra::retry::{is_retryable_db_error, Retry, RetryConfig};
use crate::infra::traits::{
    AnalyticalStore, AppendOutcome, DurableStore, RealtimeStore, SigningService,
};
use crate::metrics::{event_counter, metric_names, MetricsRegistry, TimerGuard};

/// Tuning knobs for the processing pipeline
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Re-link attempts after a chain tail conflict
    pub max_link_retries: u32,
    /// Per-call deadline for the durable tier
    pub durable_timeout: Duration,
    /// Per-call deadline for the realtime tier
    pub realtime_timeout: Duration,
    /// Per-call deadline for the analytical tier
    pub analytical_timeout: Duration,
    /// Per-call deadline for the signing service
    pub signing_timeout: Duration,
    pub durable_retry: RetryConfig,
    pub signing_retry: RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_link_retries: 5,
            durable_timeout: Duration::from_secs(5),
            realtime_timeout: Duration::from_millis(500),
            analytical_timeout: Duration::from_secs(10),
            signing_timeout: Duration::from_secs(2),
            durable_retry: RetryConfig::storage(),
            signing_retry: RetryConfig::signing(),
        }
    }
}

/// Cached chain tail. Compare-and-swap only; never trusted over the durable
/// tier.
pub struct ChainTail {
    hash: Mutex<String>,
}

impl ChainTail {
    pub fn new(hash: String) -> Self {
        Self {
            hash: Mutex::new(hash),
        }
    }

    pub async fn snapshot(&self) -> String {
        self.hash.lock().await.clone()
    }

    /// Advance from `expected` to `next`. Returns false if another task
    /// advanced the tail first, in which case the cache is left alone.
    pub async fn advance(&self, expected: &str, next: String) -> bool {
        let mut hash = self.hash.lock().await;
        if *hash == expected {
            *hash = next;
            true
        } else {
            false
        }
    }

    /// Overwrite the cache, e.g. from a fresh durable read after a conflict.
    pub async fn reset(&self, hash: String) {
        *self.hash.lock().await = hash;
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// The committed event, sealed and (if critical) signed
    pub event: LedgerEvent,
    /// True when the event id was already committed and this call was a no-op
    /// beyond replaying the side writes
    pub duplicate: bool,
}

/// Orchestrates the validate-link-sign-persist pipeline.
pub struct EventProcessor {
    durable: Arc<dyn DurableStore>,
    realtime: Arc<dyn RealtimeStore>,
    analytical: Arc<dyn AnalyticalStore>,
    signer: Arc<dyn SigningService>,
    tail: ChainTail,
    config: ProcessorConfig,
    metrics: Arc<MetricsRegistry>,
    reconciler: Arc<ReconciliationQueue>,
}

async fn with_timeout<T>(
    tier: &'static str,
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::TierTimeout { tier, timeout }),
    }
}

fn is_transient(err: &LedgerError) -> bool {
    match err {
        LedgerError::Database(db_err) => is_retryable_db_error(db_err),
        LedgerError::TierTimeout { .. } => true,
        _ => false,
    }
}

impl EventProcessor {
    /// Build a processor, reconciling the cached tail from the durable tier.
    pub async fn new(
        durable: Arc<dyn DurableStore>,
        realtime: Arc<dyn RealtimeStore>,
        analytical: Arc<dyn AnalyticalStore>,
        signer: Arc<dyn SigningService>,
        config: ProcessorConfig,
    ) -> Result<Self> {
        let tail = durable.tail_hash().await?;
        info!(tail = %tail, "event processor initialized from durable tail");
        Ok(Self {
            durable,
            realtime,
            analytical,
            signer,
            tail: ChainTail::new(tail),
            config,
            metrics: MetricsRegistry::shared(),
            reconciler: ReconciliationQueue::shared(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<ReconciliationQueue>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn reconciler(&self) -> Arc<ReconciliationQueue> {
        self.reconciler.clone()
    }

    /// Current cached tail. Diagnostic only.
    pub async fn tail_snapshot(&self) -> String {
        self.tail.snapshot().await
    }

    /// Submit one event for commitment.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn process(&self, event: LedgerEvent) -> Result<ProcessOutcome> {
        let _timer = TimerGuard::new(self.metrics.clone(), metric_names::PROCESS_LATENCY);
        let event_type = event.event_type;

        match self.process_inner(event).await {
            Ok(outcome) => {
                if outcome.duplicate {
                    self.metrics.inc_counter(metric_names::EVENTS_DUPLICATE);
                } else {
                    self.metrics.inc_counter(metric_names::EVENTS_COMMITTED);
                    self.metrics
                        .inc_counter(&event_counter(metric_names::EVENTS_COMMITTED, event_type));
                }
                Ok(outcome)
            }
            Err(e) => {
                debug!(stage = %ProcessingStage::Failed, error = %e, "submission failed");
                if matches!(e, LedgerError::MalformedInput(_)) {
                    self.metrics.inc_counter(metric_names::EVENTS_MALFORMED);
                } else {
                    self.metrics.inc_counter(metric_names::EVENTS_FAILED);
                    self.metrics
                        .inc_counter(&event_counter(metric_names::EVENTS_FAILED, event_type));
                }
                Err(e)
            }
        }
    }

    /// Structural validation. Failures are permanent; redelivery cannot fix
    /// a missing field.
    fn validate(&self, event: &mut LedgerEvent) -> Result<()> {
        if event.event_id == Uuid::nil() {
            return Err(LedgerError::MalformedInput("nil event_id".to_string()));
        }

        match event.event_type.category() {
            EventCategory::Data => {
                if event.data_hash.is_none() {
                    return Err(LedgerError::MalformedInput(format!(
                        "{} requires data_hash",
                        event.event_type
                    )));
                }
            }
            EventCategory::Session => {
                if event.session_id.is_none() {
                    return Err(LedgerError::MalformedInput(format!(
                        "{} requires session_id",
                        event.event_type
                    )));
                }
            }
            EventCategory::Access | EventCategory::Auth => {
                // auth.failure may legitimately lack a resolvable principal
                if event.user_id.is_none() && event.event_type != EventType::AuthFailure {
                    return Err(LedgerError::MalformedInput(format!(
                        "{} requires user_id",
                        event.event_type
                    )));
                }
            }
            EventCategory::Device | EventCategory::Ml => {}
        }

        // Linkage and signature fields belong to the pipeline, not the caller
        if !event.is_critical() && event.signature.is_some() {
            warn!(event_id = %event.event_id, "discarding signature on non-critical event");
        }
        event.previous_hash.clear();
        event.event_hash.clear();
        event.signature = None;
        event.signing_key_id = None;

        Ok(())
    }

    async fn process_inner(&self, mut event: LedgerEvent) -> Result<ProcessOutcome> {
        debug!(stage = %ProcessingStage::Received, event_id = %event.event_id, "submission received");
        self.validate(&mut event)?;
        debug!(stage = %ProcessingStage::Validated, event_id = %event.event_id, "envelope validated");

        // Fast-path dedup before burning a link attempt
        if self.durable.event_exists(event.event_id).await? {
            return self.replay_committed(event.event_id).await;
        }

        let mut attempt = 0u32;
        loop {
            let tail = self.tail.snapshot().await;
            event.previous_hash = tail.clone();
            event.event_hash = compute_event_hash(&event, &tail);
            event.signature = None;
            event.signing_key_id = None;
            debug!(stage = %ProcessingStage::Linked, event_hash = %event.event_hash, "event linked to tail");

            if event.is_critical() {
                self.sign(&mut event).await?;
                debug!(stage = %ProcessingStage::Signed, key_id = ?event.signing_key_id, "event hash signed");
            }

            debug!(stage = %ProcessingStage::Persisting, "writing durable and realtime tiers");
            let (durable_outcome, realtime_result) = tokio::join!(
                self.append_durable(&event, &tail),
                with_timeout(
                    "realtime",
                    self.config.realtime_timeout,
                    self.realtime.put(&event)
                ),
            );

            match durable_outcome? {
                AppendOutcome::Committed => {
                    self.tail.advance(&tail, event.event_hash.clone()).await;
                    debug!(
                        stage = %ProcessingStage::Committed,
                        event_id = %event.event_id,
                        event_hash = %event.event_hash,
                        "event committed"
                    );

                    if let Err(e) = realtime_result {
                        // Committed regardless; a redelivery will land in the
                        // duplicate path and replay the realtime write
                        warn!(event_id = %event.event_id, error = %e, "realtime write failed after commit");
                        return Err(e);
                    }

                    self.schedule_analytical(event.clone());
                    return Ok(ProcessOutcome {
                        event,
                        duplicate: false,
                    });
                }
                AppendOutcome::Duplicate => {
                    // Lost a race with another delivery of the same event
                    return self.replay_committed(event.event_id).await;
                }
                AppendOutcome::TailConflict => {
                    self.metrics.inc_counter(metric_names::TAIL_CONFLICTS);
                    attempt += 1;
                    if attempt > self.config.max_link_retries {
                        return Err(LedgerError::ChainLinkageConflict {
                            expected_tail: tail,
                        });
                    }
                    let fresh = with_timeout(
                        "durable",
                        self.config.durable_timeout,
                        self.durable.tail_hash(),
                    )
                    .await?;
                    debug!(
                        event_id = %event.event_id,
                        attempt,
                        fresh_tail = %fresh,
                        "chain tail moved, re-linking"
                    );
                    self.tail.reset(fresh).await;
                }
            }
        }
    }

    async fn sign(&self, event: &mut LedgerEvent) -> Result<()> {
        let _timer = TimerGuard::new(self.metrics.clone(), metric_names::SIGN_LATENCY);
        let retry = Retry::new(self.config.signing_retry.clone());
        let hash = event.event_hash.clone();

        let signature = retry
            .run_with_predicate(
                || {
                    with_timeout(
                        "signing",
                        self.config.signing_timeout,
                        self.signer.sign(&hash),
                    )
                },
                is_transient,
            )
            .await
            .into_result()?;

        event.signature = Some(signature.signature);
        event.signing_key_id = Some(signature.key_id);
        Ok(())
    }

    async fn append_durable(&self, event: &LedgerEvent, expected_tail: &str) -> Result<AppendOutcome> {
        let retry = Retry::new(self.config.durable_retry.clone());
        let result = retry
            .run_with_predicate(
                || {
                    with_timeout(
                        "durable",
                        self.config.durable_timeout,
                        self.durable.append(event, expected_tail),
                    )
                },
                is_transient,
            )
            .await;

        let attempts = result.attempts;
        // Conflicts and duplicates come back as outcomes, so any error here
        // means the write never confirmed
        result.into_result().map_err(|e| LedgerError::DurableWriteFailure {
            attempts,
            reason: e.to_string(),
        })
    }

    /// Duplicate delivery: the durable tier already holds the sealed event.
    /// Replay the side writes from the committed record so a crash between
    /// tiers on the first delivery heals here.
    async fn replay_committed(&self, event_id: Uuid) -> Result<ProcessOutcome> {
        let committed = self
            .durable
            .get_by_id(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))?;

        debug!(event_id = %event_id, "duplicate delivery, replaying side writes");

        with_timeout(
            "realtime",
            self.config.realtime_timeout,
            self.realtime.put(&committed),
        )
        .await?;
        self.schedule_analytical(committed.clone());

        Ok(ProcessOutcome {
            event: committed,
            duplicate: true,
        })
    }

    /// Analytical writes run after the call returns. Failures are queued for
    /// background reconciliation, never surfaced to the submitter.
    fn schedule_analytical(&self, event: LedgerEvent) {
        let analytical = self.analytical.clone();
        let reconciler = self.reconciler.clone();
        let timeout = self.config.analytical_timeout;

        tokio::spawn(async move {
            let result =
                with_timeout("analytical", timeout, analytical.insert(&event)).await;
            if let Err(e) = result {
                reconciler.enqueue(event, e.to_string()).await;
            }
        });
    }
}
