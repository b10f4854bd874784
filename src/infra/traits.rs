//! Storage tier and signing service abstractions
//!
//! The processor fans an event out to three tiers with different guarantees:
//! realtime (fast, non-authoritative), durable (the authoritative chain) and
//! analytical (eventually consistent aggregates). Each tier is a trait so
//! tests can substitute in-memory or mock implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::crypto::EventSignature;
use crate::domain::{EventFilter, LedgerEvent, SessionId, UserId};
use crate::infra::error::Result;

/// Outcome of a conditional append against the durable chain tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Event is durably part of the chain
    Committed,
    /// `expected_tail` no longer matches; re-link and retry
    TailConflict,
    /// An event with this `event_id` is already committed
    Duplicate,
}

/// The authoritative, append-only store. Arbiter of chain order.
///
/// `append` is a compare-and-set on the chain tail: the write commits only if
/// the stored tail still equals `expected_tail` at commit time, and only if
/// no event with the same `event_id` exists. Everything else the ledger
/// claims about ordering derives from this one conditional write.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Conditionally append a fully sealed event.
    async fn append(&self, event: &LedgerEvent, expected_tail: &str) -> Result<AppendOutcome>;

    /// `event_hash` of the most recent committed event, or the genesis hash
    /// for an empty chain.
    async fn tail_hash(&self) -> Result<String>;

    /// Fast dedup probe by event id.
    async fn event_exists(&self, event_id: Uuid) -> Result<bool>;

    /// Fetch one committed event.
    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<LedgerEvent>>;

    /// Committed events in chain order whose timestamp falls in `[start, end]`.
    async fn read_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>>;

    /// The contiguous chain segment, in commit order, spanning every event
    /// whose timestamp falls in `[start, end]`.
    ///
    /// Commit order and timestamp order can diverge under concurrent
    /// submission, so the segment may interleave events with out-of-window
    /// timestamps; linkage checks need those to see an unbroken chain.
    /// Empty when no event's timestamp falls in the window.
    async fn read_window_span(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>>;

    /// Committed events for one session, in chain order.
    async fn read_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEvent>>;

    /// Total committed events.
    async fn count(&self) -> Result<u64>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}

/// Low-latency tier for operational dashboards. Last-write-wins by event id,
/// so replaying a write is harmless.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn put(&self, event: &LedgerEvent) -> Result<()>;

    async fn get(&self, event_id: Uuid) -> Result<Option<LedgerEvent>>;

    /// Most recent events matching `filter`, newest first, at most `limit`.
    async fn recent(&self, filter: &EventFilter, limit: usize) -> Result<Vec<LedgerEvent>>;

    async fn ping(&self) -> Result<()>;
}

/// Warehouse tier backing compliance reports. Written asynchronously after
/// commit; readers must tolerate lag.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalyticalStore: Send + Sync {
    /// Insert one committed event. Idempotent by event id.
    async fn insert(&self, event: &LedgerEvent) -> Result<()>;

    /// Access-category events in `[start, end]`, optionally for one user.
    async fn access_events(
        &self,
        user_id: Option<UserId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>>;

    /// Event counts per event type over `[start, end]`.
    async fn count_by_type(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>>;

    /// Every event attributable to one user, for subject access requests.
    async fn events_for_user(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>>;

    /// Timestamp of the most recently ingested event, if any. Reports quote
    /// this so readers can judge staleness.
    async fn freshness(&self) -> Result<Option<DateTime<Utc>>>;

    async fn ping(&self) -> Result<()>;
}

/// Detached signing facility for critical events.
///
/// Signs the hex event hash, never the full payload, so the signing boundary
/// carries 32 bytes regardless of event size.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SigningService: Send + Sync {
    /// Sign an event hash with the active key.
    async fn sign(&self, event_hash: &str) -> Result<EventSignature>;

    /// Verify a recorded signature against the key id recorded with it.
    /// `Ok(false)` means the signature does not match; unknown key ids are
    /// an error, not a failed verification.
    async fn verify(&self, event_hash: &str, signature: &str, key_id: &str) -> Result<bool>;

    /// Identifier of the key new signatures will use.
    async fn active_key_id(&self) -> Result<String>;

    async fn ping(&self) -> Result<()>;
}
