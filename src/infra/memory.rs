//! In-memory storage tier implementations
//!
//! [`MemoryRealtimeStore`] is the default realtime tier. The durable and
//! analytical implementations exist for tests and local development; they
//! honor the same contracts as the persistent versions, including the
//! conditional append.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::crypto::GENESIS_HASH;
use crate::domain::{EventFilter, LedgerEvent, SessionId, UserId};
use crate::infra::error::Result;
use crate::infra::traits::{AnalyticalStore, AppendOutcome, DurableStore, RealtimeStore};

/// Realtime tier backed by a hash map. Last-write-wins by event id.
#[derive(Default)]
pub struct MemoryRealtimeStore {
    events: RwLock<HashMap<Uuid, LedgerEvent>>,
}

impl MemoryRealtimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RealtimeStore for MemoryRealtimeStore {
    async fn put(&self, event: &LedgerEvent) -> Result<()> {
        self.events
            .write()
            .await
            .insert(event.event_id, event.clone());
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<LedgerEvent>> {
        Ok(self.events.read().await.get(&event_id).cloned())
    }

    async fn recent(&self, filter: &EventFilter, limit: usize) -> Result<Vec<LedgerEvent>> {
        let events = self.events.read().await;
        let mut matched: Vec<LedgerEvent> = events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct DurableState {
    chain: Vec<LedgerEvent>,
    seen_ids: HashSet<Uuid>,
}

/// Durable tier over a vector, with the same compare-and-set append
/// semantics as the persistent store. One mutex covers the whole chain so
/// the tail check and the insert are atomic.
pub struct MemoryDurableStore {
    state: Mutex<DurableState>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DurableState {
                chain: Vec::new(),
                seen_ids: HashSet::new(),
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of the whole chain, in order. Test helper.
    pub async fn all_events(&self) -> Vec<LedgerEvent> {
        self.state.lock().await.chain.clone()
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn append(&self, event: &LedgerEvent, expected_tail: &str) -> Result<AppendOutcome> {
        let mut state = self.state.lock().await;

        if state.seen_ids.contains(&event.event_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        let tail = state
            .chain
            .last()
            .map(|e| e.event_hash.as_str())
            .unwrap_or(GENESIS_HASH);
        if tail != expected_tail {
            return Ok(AppendOutcome::TailConflict);
        }

        state.seen_ids.insert(event.event_id);
        state.chain.push(event.clone());
        Ok(AppendOutcome::Committed)
    }

    async fn tail_hash(&self) -> Result<String> {
        let state = self.state.lock().await;
        Ok(state
            .chain
            .last()
            .map(|e| e.event_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.state.lock().await.seen_ids.contains(&event_id))
    }

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<LedgerEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .chain
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned())
    }

    async fn read_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .chain
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn read_window_span(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let state = self.state.lock().await;
        let in_window = |e: &LedgerEvent| e.timestamp >= start && e.timestamp <= end;
        let first = state.chain.iter().position(|e| in_window(e));
        let last = state.chain.iter().rposition(|e| in_window(e));
        Ok(match (first, last) {
            (Some(first), Some(last)) => state.chain[first..=last].to_vec(),
            _ => Vec::new(),
        })
    }

    async fn read_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .chain
            .iter()
            .filter(|e| e.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.lock().await.chain.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct AnalyticalState {
    rows: HashMap<Uuid, LedgerEvent>,
    last_insert_ts: Option<DateTime<Utc>>,
}

/// Analytical tier over a hash map. Insert is idempotent by event id and the
/// freshness watermark tracks the newest event timestamp seen.
pub struct MemoryAnalyticalStore {
    state: Mutex<AnalyticalState>,
}

impl MemoryAnalyticalStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AnalyticalState {
                rows: HashMap::new(),
                last_insert_ts: None,
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryAnalyticalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticalStore for MemoryAnalyticalStore {
    async fn insert(&self, event: &LedgerEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        state.rows.insert(event.event_id, event.clone());
        state.last_insert_ts = match state.last_insert_ts {
            Some(ts) if ts >= event.timestamp => Some(ts),
            _ => Some(event.timestamp),
        };
        Ok(())
    }

    async fn access_events(
        &self,
        user_id: Option<UserId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<LedgerEvent> = state
            .rows
            .values()
            .filter(|e| {
                e.event_type.category() == crate::domain::EventCategory::Access
                    && e.timestamp >= start
                    && e.timestamp <= end
                    && user_id.as_ref().map_or(true, |u| e.user_id.as_ref() == Some(u))
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    async fn count_by_type(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>> {
        let state = self.state.lock().await;
        let mut counts = BTreeMap::new();
        for event in state.rows.values() {
            if event.timestamp >= start && event.timestamp <= end {
                *counts
                    .entry(event.event_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn events_for_user(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<LedgerEvent> = state
            .rows
            .values()
            .filter(|e| {
                e.user_id.as_ref() == Some(&user_id)
                    && e.timestamp >= start
                    && e.timestamp <= end
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    async fn freshness(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.last_insert_ts)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
