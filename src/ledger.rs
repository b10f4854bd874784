//! The ledger facade: one typed entry point per recordable occurrence
//!
//! Wraps the event processor so application code never constructs envelopes
//! or touches linkage by hand. Also hosts the on-demand integrity audit over
//! the committed chain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::crypto::{compute_merkle_root, find_chain_break, verify_event};
use crate::domain::{DeviceId, LedgerEvent, SessionId, UserId};
use crate::infra::{
    DurableStore, EventProcessor, LedgerError, ProcessOutcome, Result, SigningService,
};

/// Outcome of an integrity audit over a time range.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// True when every link, hash and signature checked out
    pub valid: bool,
    pub events_checked: usize,
    /// Index (within the audited range) of the first defect, if any
    pub break_index: Option<usize>,
    /// Merkle root over the audited events, an auditable fingerprint of the
    /// whole range
    pub merkle_root: String,
    pub range: (DateTime<Utc>, DateTime<Utc>),
}

/// High-level ledger API.
pub struct NeuralLedger {
    processor: Arc<EventProcessor>,
    durable: Arc<dyn DurableStore>,
    signer: Arc<dyn SigningService>,
}

impl NeuralLedger {
    pub fn new(
        processor: Arc<EventProcessor>,
        durable: Arc<dyn DurableStore>,
        signer: Arc<dyn SigningService>,
    ) -> Self {
        Self {
            processor,
            durable,
            signer,
        }
    }

    pub fn processor(&self) -> Arc<EventProcessor> {
        self.processor.clone()
    }

    /// Submit an already-built envelope.
    pub async fn log_event(&self, event: LedgerEvent) -> Result<ProcessOutcome> {
        self.processor.process(event).await
    }

    pub async fn log_session_created(
        &self,
        session_id: SessionId,
        user_id: Option<UserId>,
        device_id: Option<DeviceId>,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::session_created(session_id, user_id, device_id))
            .await
    }

    pub async fn log_session_ended(
        &self,
        session_id: SessionId,
        duration_secs: Option<f64>,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::session_ended(session_id, duration_secs))
            .await
    }

    pub async fn log_data_ingested(
        &self,
        session_id: SessionId,
        data_hash: impl Into<String>,
        data_size_bytes: u64,
        source: &str,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::data_ingested(
            session_id,
            data_hash,
            data_size_bytes,
            source,
        ))
        .await
    }

    pub async fn log_data_exported(
        &self,
        user_id: UserId,
        data_hash: impl Into<String>,
        destination: &str,
        record_count: u64,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::data_exported(
            user_id,
            data_hash,
            destination,
            record_count,
        ))
        .await
    }

    pub async fn log_device_connected(
        &self,
        device_id: DeviceId,
        session_id: Option<SessionId>,
        device_model: &str,
        firmware_version: &str,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::device_connected(
            device_id,
            session_id,
            device_model,
            firmware_version,
        ))
        .await
    }

    pub async fn log_device_disconnected(
        &self,
        device_id: DeviceId,
        reason: &str,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::device_disconnected(device_id, reason))
            .await
    }

    pub async fn log_ml_inference(
        &self,
        session_id: SessionId,
        model_id: &str,
        model_version: &str,
        latency_ms: f64,
        confidence: Option<f64>,
    ) -> Result<ProcessOutcome> {
        self.log_event(LedgerEvent::ml_inference(
            session_id,
            model_id,
            model_version,
            latency_ms,
            confidence,
        ))
        .await
    }

    /// Record an access decision. `granted: false` requires a denial reason.
    pub async fn log_access_event(
        &self,
        user_id: UserId,
        resource: &str,
        granted: bool,
        denial_reason: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<ProcessOutcome> {
        let event = if granted {
            LedgerEvent::access_granted(user_id, resource, ip_address)
        } else {
            let reason = denial_reason.ok_or_else(|| {
                LedgerError::MalformedInput("access denial requires a reason".to_string())
            })?;
            LedgerEvent::access_denied(user_id, resource, reason, ip_address)
        };
        self.log_event(event).await
    }

    pub async fn log_auth_event(
        &self,
        user_id: Option<UserId>,
        method: &str,
        success: bool,
        failure_reason: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<ProcessOutcome> {
        let event = if success {
            let user_id = user_id.ok_or_else(|| {
                LedgerError::MalformedInput("successful auth requires a user_id".to_string())
            })?;
            LedgerEvent::auth_success(user_id, method, ip_address)
        } else {
            LedgerEvent::auth_failure(
                user_id,
                method,
                failure_reason.unwrap_or("unspecified"),
                ip_address,
            )
        };
        self.log_event(event).await
    }

    /// Audit the committed chain over `[start, end]`.
    ///
    /// Linkage is checked over the contiguous commit-order segment spanning
    /// the window, not over the window's events alone: commit order and
    /// timestamp order can diverge, and skipping an interleaved event would
    /// make an intact chain look broken. The report still counts and
    /// fingerprints only the in-window events.
    ///
    /// Read-only: a defect is reported, logged at error level, and never
    /// auto-corrected. The report carries a Merkle root over the audited
    /// range so two auditors can compare fingerprints instead of full dumps.
    pub async fn verify_chain_integrity(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<IntegrityReport> {
        let span = self.durable.read_window_span(start, end).await?;
        let in_window = |e: &LedgerEvent| e.timestamp >= start && e.timestamp <= end;
        let events: Vec<LedgerEvent> = span.iter().filter(|e| in_window(e)).cloned().collect();

        // A link defect anywhere in the span taints the window; report it at
        // the nearest in-window position at or after the defect.
        let mut break_index = find_chain_break(&span).map(|span_index| {
            let preceding = span[..span_index].iter().filter(|e| in_window(e)).count();
            preceding.min(events.len().saturating_sub(1))
        });

        if break_index.is_none() {
            for (index, event) in events.iter().enumerate() {
                if !self.signature_ok(event).await? {
                    break_index = Some(index);
                    break;
                }
            }
        }

        let report = IntegrityReport {
            valid: break_index.is_none(),
            events_checked: events.len(),
            break_index,
            merkle_root: compute_merkle_root(&events),
            range: (start, end),
        };

        if report.valid {
            info!(
                events_checked = report.events_checked,
                merkle_root = %report.merkle_root,
                "chain integrity verified"
            );
        } else {
            error!(
                events_checked = report.events_checked,
                break_index = report.break_index,
                "CHAIN INTEGRITY VIOLATION detected"
            );
        }

        Ok(report)
    }

    /// A critical event must carry a signature that verifies against its
    /// recorded key; a non-critical event passes vacuously.
    async fn signature_ok(&self, event: &LedgerEvent) -> Result<bool> {
        if !event.is_critical() {
            return Ok(true);
        }
        match (&event.signature, &event.signing_key_id) {
            (Some(signature), Some(key_id)) => {
                self.signer
                    .verify(&event.event_hash, signature, key_id)
                    .await
            }
            _ => Ok(false),
        }
    }

    /// Re-verify one committed event's hash and signature.
    pub async fn verify_event_integrity(&self, event_id: uuid::Uuid) -> Result<bool> {
        let event = self
            .durable
            .get_by_id(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))?;

        Ok(verify_event(&event, &event.previous_hash) && self.signature_ok(&event).await?)
    }
}
