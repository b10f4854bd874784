//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use neural_ledger::crypto::{EventSignature, KeyRing};
use neural_ledger::domain::LedgerEvent;
use neural_ledger::infra::{
    AnalyticalStore, EventProcessor, LedgerError, MemoryAnalyticalStore, MemoryDurableStore,
    MemoryRealtimeStore, ProcessorConfig, Result, SigningService,
};
use neural_ledger::ledger::NeuralLedger;
use neural_ledger::query::QueryService;

/// Fully wired in-memory stack.
pub struct TestStack {
    pub ledger: NeuralLedger,
    pub query: QueryService,
    pub processor: Arc<EventProcessor>,
    pub durable: Arc<MemoryDurableStore>,
    pub realtime: Arc<MemoryRealtimeStore>,
    pub analytical: Arc<MemoryAnalyticalStore>,
    pub signer: Arc<KeyRing>,
}

pub async fn build_stack() -> TestStack {
    build_stack_with_config(ProcessorConfig::default()).await
}

pub async fn build_stack_with_config(config: ProcessorConfig) -> TestStack {
    let durable = MemoryDurableStore::shared();
    let realtime = MemoryRealtimeStore::shared();
    let analytical = MemoryAnalyticalStore::shared();
    let signer: Arc<KeyRing> = Arc::new(KeyRing::new());

    let processor = Arc::new(
        EventProcessor::new(
            durable.clone(),
            realtime.clone(),
            analytical.clone(),
            signer.clone(),
            config,
        )
        .await
        .expect("processor construction"),
    );

    TestStack {
        ledger: NeuralLedger::new(processor.clone(), durable.clone(), signer.clone()),
        query: QueryService::new(durable.clone(), realtime.clone(), analytical.clone()),
        processor,
        durable,
        realtime,
        analytical,
        signer,
    }
}

/// Let spawned analytical writes land.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

pub fn wide_range() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (
        now - chrono::Duration::hours(1),
        now + chrono::Duration::hours(1),
    )
}

/// Signing service that always refuses.
pub struct FailingSigner;

#[async_trait]
impl SigningService for FailingSigner {
    async fn sign(&self, _event_hash: &str) -> Result<EventSignature> {
        Err(LedgerError::Internal("hsm unavailable".to_string()))
    }

    async fn verify(&self, _event_hash: &str, _signature: &str, _key_id: &str) -> Result<bool> {
        Err(LedgerError::Internal("hsm unavailable".to_string()))
    }

    async fn active_key_id(&self) -> Result<String> {
        Err(LedgerError::Internal("hsm unavailable".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(LedgerError::Internal("hsm unavailable".to_string()))
    }
}

/// Analytical store that fails the first `failures` inserts, then delegates
/// to an in-memory store.
pub struct FlakyAnalyticalStore {
    inner: MemoryAnalyticalStore,
    remaining_failures: AtomicU32,
}

impl FlakyAnalyticalStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryAnalyticalStore::new(),
            remaining_failures: AtomicU32::new(failures),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl AnalyticalStore for FlakyAnalyticalStore {
    async fn insert(&self, event: &LedgerEvent) -> Result<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::AnalyticalWriteFailure(
                "warehouse unreachable".to_string(),
            ));
        }
        self.inner.insert(event).await
    }

    async fn access_events(
        &self,
        user_id: Option<neural_ledger::domain::UserId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        self.inner.access_events(user_id, start, end).await
    }

    async fn count_by_type(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<std::collections::BTreeMap<String, u64>> {
        self.inner.count_by_type(start, end).await
    }

    async fn events_for_user(
        &self,
        user_id: neural_ledger::domain::UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        self.inner.events_for_user(user_id, start, end).await
    }

    async fn freshness(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.freshness().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
