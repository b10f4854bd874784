//! Tamper detection across the committed chain.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use neural_ledger::crypto::{
    compute_merkle_root, find_chain_break, repair_chain, verify_chain, KeyRing,
};
use neural_ledger::domain::{EventType, LedgerEvent, SessionId, UserId};
use neural_ledger::infra::{AppendOutcome, DurableStore, Result};
use neural_ledger::ledger::NeuralLedger;

use common::*;

/// Durable store that serves a fixed, possibly tampered, chain.
struct FixedChain(Vec<LedgerEvent>);

#[async_trait]
impl DurableStore for FixedChain {
    async fn append(&self, _event: &LedgerEvent, _expected_tail: &str) -> Result<AppendOutcome> {
        Ok(AppendOutcome::TailConflict)
    }

    async fn tail_hash(&self) -> Result<String> {
        Ok(self
            .0
            .last()
            .map(|e| e.event_hash.clone())
            .unwrap_or_else(|| neural_ledger::crypto::GENESIS_HASH.to_string()))
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.0.iter().any(|e| e.event_id == event_id))
    }

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<LedgerEvent>> {
        Ok(self.0.iter().find(|e| e.event_id == event_id).cloned())
    }

    async fn read_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        Ok(self.0.clone())
    }

    async fn read_window_span(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        Ok(self.0.clone())
    }

    async fn read_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEvent>> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.0.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

async fn audit_over(chain: Vec<LedgerEvent>, signer: Arc<KeyRing>) -> neural_ledger::ledger::IntegrityReport {
    let stack = build_stack().await;
    let ledger = NeuralLedger::new(stack.processor.clone(), Arc::new(FixedChain(chain)), signer);
    let (start, end) = wide_range();
    ledger.verify_chain_integrity(start, end).await.unwrap()
}

#[tokio::test]
async fn committed_chain_survives_reread_verification() {
    let stack = build_stack().await;

    for i in 0..8u64 {
        stack
            .processor
            .process(
                LedgerEvent::new(EventType::DataIngested)
                    .with_data_hash("cc".repeat(32))
                    .with_metadata("chunk", i),
            )
            .await
            .unwrap();
    }

    let (start, end) = wide_range();
    let chain = stack.durable.read_range(start, end).await.unwrap();
    assert!(verify_chain(&chain));

    // Same range, same fingerprint
    let again = stack.durable.read_range(start, end).await.unwrap();
    assert_eq!(compute_merkle_root(&chain), compute_merkle_root(&again));
}

#[tokio::test]
async fn payload_tampering_is_pinpointed() {
    let stack = build_stack().await;
    for _ in 0..5 {
        stack
            .processor
            .process(LedgerEvent::new(EventType::MlInference))
            .await
            .unwrap();
    }

    let (start, end) = wide_range();
    let mut chain = stack.durable.read_range(start, end).await.unwrap();
    chain[3]
        .metadata
        .insert("injected".to_string(), "payload".into());

    assert!(!verify_chain(&chain));
    assert_eq!(find_chain_break(&chain), Some(3));

    let report = audit_over(chain, stack.signer.clone()).await;
    assert!(!report.valid);
    assert_eq!(report.break_index, Some(3));
}

#[tokio::test]
async fn stripped_signature_fails_the_audit() {
    let stack = build_stack().await;
    stack
        .processor
        .process(LedgerEvent::auth_success(UserId::from("u-1"), "password", None))
        .await
        .unwrap();

    let (start, end) = wide_range();
    let mut chain = stack.durable.read_range(start, end).await.unwrap();
    assert!(verify_chain(&chain)); // hashes untouched

    chain[0].signature = None;
    chain[0].signing_key_id = None;

    let report = audit_over(chain, stack.signer.clone()).await;
    assert!(!report.valid);
    assert_eq!(report.break_index, Some(0));
}

#[tokio::test]
async fn swapped_signature_fails_the_audit() {
    let stack = build_stack().await;
    let a = stack
        .processor
        .process(LedgerEvent::auth_success(UserId::from("u-1"), "password", None))
        .await
        .unwrap();
    let _b = stack
        .processor
        .process(LedgerEvent::auth_success(UserId::from("u-2"), "password", None))
        .await
        .unwrap();

    let (start, end) = wide_range();
    let mut chain = stack.durable.read_range(start, end).await.unwrap();

    // Graft event A's signature onto event B
    chain[1].signature = a.event.signature.clone();

    let report = audit_over(chain, stack.signer.clone()).await;
    assert!(!report.valid);
    assert_eq!(report.break_index, Some(1));
}

#[tokio::test]
async fn audit_tolerates_commit_order_diverging_from_timestamps() {
    let stack = build_stack().await;

    // The middle commit carries a timestamp two hours in the past, as a
    // delayed submitter would produce. The audit window below covers only
    // its neighbors, yet the chain is intact.
    let first = LedgerEvent::new(EventType::MlInference);
    let mut backdated = LedgerEvent::new(EventType::MlInference);
    backdated.timestamp = Utc::now() - chrono::Duration::hours(2);
    let last = LedgerEvent::new(EventType::MlInference);

    stack.processor.process(first).await.unwrap();
    stack.processor.process(backdated).await.unwrap();
    stack.processor.process(last).await.unwrap();

    let (start, end) = wide_range();
    let report = stack
        .ledger
        .verify_chain_integrity(start, end)
        .await
        .unwrap();

    assert!(report.valid);
    assert_eq!(report.break_index, None);
    // The backdated event falls outside the window and is not counted
    assert_eq!(report.events_checked, 2);
}

#[tokio::test]
async fn repair_rebuilds_linkage_but_not_signatures() {
    let events: Vec<LedgerEvent> = (0..6)
        .map(|i| LedgerEvent::new(EventType::DataIngested).with_metadata("i", i as u64))
        .collect();

    let repaired = repair_chain(&events);
    assert!(verify_chain(&repaired));

    // Repair is linkage-only; identity fields are untouched
    for (original, fixed) in events.iter().zip(&repaired) {
        assert_eq!(original.event_id, fixed.event_id);
        assert_eq!(original.metadata, fixed.metadata);
    }
}
