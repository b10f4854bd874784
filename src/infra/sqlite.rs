//! SQLite implementation of the durable tier
//!
//! One table holds the chain. The full event is stored as canonical JSON in
//! `record`; the indexed columns exist only for querying and never override
//! the record. The conditional append runs inside a transaction so the tail
//! check, the dedup check and the insert are atomic.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::crypto::GENESIS_HASH;
use crate::domain::{LedgerEvent, SessionId};
use crate::infra::error::{LedgerError, Result};
use crate::infra::traits::{AppendOutcome, DurableStore};

use async_trait::async_trait;

/// Durable ledger store backed by SQLite.
pub struct SqliteDurableStore {
    pool: SqlitePool,
}

fn ts_str(ts: &DateTime<Utc>) -> String {
    // RFC 3339 with fixed microsecond precision in UTC sorts lexicographically,
    // so range queries can compare text columns directly
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_record(record: &str) -> Result<LedgerEvent> {
    Ok(serde_json::from_str(record)?)
}

impl SqliteDurableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database by URL, e.g. `sqlite://ledger.db?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database for tests and local development.
    pub async fn in_memory() -> Result<Self> {
        // A second connection would see a different empty database, so the
        // pool is pinned to one connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_events (
                position     INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id     TEXT NOT NULL UNIQUE,
                event_type   TEXT NOT NULL,
                session_id   TEXT,
                user_id      TEXT,
                timestamp    TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                event_hash   TEXT NOT NULL,
                record       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledger_events_timestamp ON ledger_events (timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledger_events_session ON ledger_events (session_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledger_events_user ON ledger_events (user_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn append(&self, event: &LedgerEvent, expected_tail: &str) -> Result<AppendOutcome> {
        if event.event_hash.is_empty() {
            return Err(LedgerError::MalformedInput(
                "event is not sealed, event_hash is empty".to_string(),
            ));
        }

        let record = serde_json::to_string(event)?;
        let mut tx = self.pool.begin().await?;

        let duplicate: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM ledger_events WHERE event_id = ?")
                .bind(event.event_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if duplicate.is_some() {
            return Ok(AppendOutcome::Duplicate);
        }

        let tail: Option<(String,)> = sqlx::query_as(
            "SELECT event_hash FROM ledger_events ORDER BY position DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;
        let tail = tail.map(|(h,)| h).unwrap_or_else(|| GENESIS_HASH.to_string());
        if tail != expected_tail {
            return Ok(AppendOutcome::TailConflict);
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_events (
                event_id, event_type, session_id, user_id,
                timestamp, previous_hash, event_hash, record
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.session_id.as_ref().map(|s| s.as_str().to_string()))
        .bind(event.user_id.as_ref().map(|u| u.as_str().to_string()))
        .bind(ts_str(&event.timestamp))
        .bind(&event.previous_hash)
        .bind(&event.event_hash)
        .bind(&record)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Committed)
    }

    async fn tail_hash(&self) -> Result<String> {
        let tail: Option<(String,)> = sqlx::query_as(
            "SELECT event_hash FROM ledger_events ORDER BY position DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(tail.map(|(h,)| h).unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM ledger_events WHERE event_id = ?")
                .bind(event_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<LedgerEvent>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM ledger_events WHERE event_id = ?")
                .bind(event_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(record,)| decode_record(&record)).transpose()
    }

    async fn read_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT record FROM ledger_events
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY position ASC
            "#,
        )
        .bind(ts_str(&start))
        .bind(ts_str(&end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(record,)| decode_record(record)).collect()
    }

    async fn read_window_span(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let (lo, hi): (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT MIN(position), MAX(position) FROM ledger_events
            WHERE timestamp >= ? AND timestamp <= ?
            "#,
        )
        .bind(ts_str(&start))
        .bind(ts_str(&end))
        .fetch_one(&self.pool)
        .await?;

        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return Ok(Vec::new()),
        };

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT record FROM ledger_events
            WHERE position BETWEEN ? AND ?
            ORDER BY position ASC
            "#,
        )
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(record,)| decode_record(record)).collect()
    }

    async fn read_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record FROM ledger_events WHERE session_id = ? ORDER BY position ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(record,)| decode_record(record)).collect()
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::compute_event_hash;
    use crate::domain::EventType;

    fn sealed(mut event: LedgerEvent, previous_hash: &str) -> LedgerEvent {
        event.previous_hash = previous_hash.to_string();
        event.event_hash = compute_event_hash(&event, previous_hash);
        event
    }

    #[tokio::test]
    async fn test_empty_chain_tail_is_genesis() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        assert_eq!(store.tail_hash().await.unwrap(), GENESIS_HASH);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_and_fetch_roundtrip() {
        let store = SqliteDurableStore::in_memory().await.unwrap();

        let event = sealed(
            LedgerEvent::new(EventType::DataIngested)
                .with_session(SessionId::from("s-1"))
                .with_metadata("data_size_bytes", 4096u64),
            GENESIS_HASH,
        );

        assert_eq!(
            store.append(&event, GENESIS_HASH).await.unwrap(),
            AppendOutcome::Committed
        );
        assert_eq!(store.tail_hash().await.unwrap(), event.event_hash);

        let fetched = store.get_by_id(event.event_id).await.unwrap().unwrap();
        assert_eq!(fetched, event);
    }

    #[tokio::test]
    async fn test_stale_tail_is_rejected() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        let e1 = sealed(LedgerEvent::new(EventType::DataIngested), GENESIS_HASH);
        store.append(&e1, GENESIS_HASH).await.unwrap();

        let e2 = sealed(LedgerEvent::new(EventType::DataIngested), GENESIS_HASH);
        assert_eq!(
            store.append(&e2, GENESIS_HASH).await.unwrap(),
            AppendOutcome::TailConflict
        );
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_detected() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        let e1 = sealed(LedgerEvent::new(EventType::DataIngested), GENESIS_HASH);
        store.append(&e1, GENESIS_HASH).await.unwrap();

        let tail = store.tail_hash().await.unwrap();
        assert_eq!(
            store.append(&e1, &tail).await.unwrap(),
            AppendOutcome::Duplicate
        );
        assert!(store.event_exists(e1.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unsealed_event_rejected() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        let event = LedgerEvent::new(EventType::DataIngested);

        let err = store.append(&event, GENESIS_HASH).await.unwrap_err();
        assert!(matches!(err, LedgerError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_session_reads_preserve_chain_order() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        let session = SessionId::from("s-42");

        let mut tail = GENESIS_HASH.to_string();
        let mut expected = Vec::new();
        for i in 0..3u64 {
            let event = sealed(
                LedgerEvent::new(EventType::DataIngested)
                    .with_session(session.clone())
                    .with_metadata("seq", i),
                &tail,
            );
            store.append(&event, &tail).await.unwrap();
            tail = event.event_hash.clone();
            expected.push(event);
        }

        let read = store.read_session(&session).await.unwrap();
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn test_window_span_keeps_interleaved_commits() {
        let store = SqliteDurableStore::in_memory().await.unwrap();

        let mut tail = GENESIS_HASH.to_string();
        let mut chain = Vec::new();
        for i in 0..3u64 {
            let mut event = LedgerEvent::new(EventType::MlInference).with_metadata("seq", i);
            if i == 1 {
                event.timestamp = event.timestamp - chrono::Duration::hours(2);
            }
            let event = sealed(event, &tail);
            store.append(&event, &tail).await.unwrap();
            tail = event.event_hash.clone();
            chain.push(event);
        }

        let now = Utc::now();
        let start = now - chrono::Duration::hours(1);
        let end = now + chrono::Duration::hours(1);

        // The timestamp filter drops the backdated middle commit; the span
        // keeps it so linkage over the segment stays contiguous
        assert_eq!(store.read_range(start, end).await.unwrap().len(), 2);
        assert_eq!(store.read_window_span(start, end).await.unwrap(), chain);

        let later = store
            .read_window_span(
                now + chrono::Duration::hours(2),
                now + chrono::Duration::hours(3),
            )
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_range_reads_by_timestamp() {
        let store = SqliteDurableStore::in_memory().await.unwrap();
        let event = sealed(LedgerEvent::new(EventType::MlInference), GENESIS_HASH);
        store.append(&event, GENESIS_HASH).await.unwrap();

        let start = event.timestamp - chrono::Duration::seconds(1);
        let end = event.timestamp + chrono::Duration::seconds(1);
        assert_eq!(store.read_range(start, end).await.unwrap().len(), 1);

        let early_end = event.timestamp - chrono::Duration::seconds(1);
        let early_start = early_end - chrono::Duration::seconds(1);
        assert!(store
            .read_range(early_start, early_end)
            .await
            .unwrap()
            .is_empty());
    }
}
