//! Error types for the Neural Ledger infrastructure

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::SigningError;

/// Errors that can occur in the ledger infrastructure
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Event failed structural validation and can never succeed
    #[error("malformed event: {0}")]
    MalformedInput(String),

    /// Another writer advanced the chain tail first
    #[error("chain tail moved, expected {expected_tail}")]
    ChainLinkageConflict { expected_tail: String },

    /// Signing service refused or failed to sign a critical event
    #[error("signing failure: {0}")]
    SigningFailure(#[from] SigningError),

    /// Durable tier did not confirm the write
    #[error("durable write failed after {attempts} attempts: {reason}")]
    DurableWriteFailure { attempts: u32, reason: String },

    /// Analytical tier write failed (event is already committed)
    #[error("analytical write failed: {0}")]
    AnalyticalWriteFailure(String),

    /// Stored chain failed verification
    #[error("chain integrity violation at index {index}")]
    ChainIntegrityViolation { index: usize },

    /// A storage tier exceeded its per-call deadline
    #[error("{tier} tier timed out after {timeout:?}")]
    TierTimeout {
        tier: &'static str,
        timeout: Duration,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Event not found
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// What the caller should do with a failed submission.
///
/// Replaces ad-hoc catch blocks with one classification point: every error
/// maps to exactly one disposition, and the consumer acts on the disposition
/// rather than on the error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Permanent input defect; acknowledge and discard
    Drop,
    /// Absorbed by the processor's own retry loop; callers never see this
    /// unless the loop is exhausted
    RetryInternal,
    /// Transient; redeliver the submission to the processor
    RetryCaller,
    /// Event is committed; only a side write needs background repair
    RetryBackground,
    /// Integrity or configuration defect; page an operator
    Alert,
}

impl LedgerError {
    /// Classify this error for the caller.
    pub fn disposition(&self) -> Disposition {
        match self {
            LedgerError::MalformedInput(_) | LedgerError::Serialization(_) => Disposition::Drop,
            LedgerError::ChainLinkageConflict { .. } => Disposition::RetryInternal,
            LedgerError::SigningFailure(_)
            | LedgerError::DurableWriteFailure { .. }
            | LedgerError::TierTimeout { .. }
            | LedgerError::Database(_)
            | LedgerError::EventNotFound(_)
            | LedgerError::Internal(_) => Disposition::RetryCaller,
            LedgerError::AnalyticalWriteFailure(_) => Disposition::RetryBackground,
            LedgerError::ChainIntegrityViolation { .. } | LedgerError::Configuration(_) => {
                Disposition::Alert
            }
        }
    }

    /// True if redelivering the same submission could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.disposition(),
            Disposition::RetryInternal | Disposition::RetryCaller
        )
    }
}
