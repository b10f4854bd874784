//! Infrastructure: storage tiers, processing pipeline, background repair
//!
//! - [`traits`] - Tier and signing service abstractions
//! - [`processor`] - The validate-link-sign-persist pipeline
//! - [`memory`] - In-memory tier implementations
//! - [`sqlite`] - SQLite durable tier
//! - [`reconcile`] - Background replay of failed analytical writes
//! - [`retry`] - Backoff and retry utilities
//! - [`health`] - Dependency probes

pub mod error;
pub mod health;
pub mod memory;
pub mod processor;
pub mod reconcile;
pub mod retry;
pub mod sqlite;
pub mod traits;

pub use error::{Disposition, LedgerError, Result};
pub use health::{ComponentHealth, HealthChecker, HealthStatus};
pub use memory::{MemoryAnalyticalStore, MemoryDurableStore, MemoryRealtimeStore};
pub use processor::{ChainTail, EventProcessor, ProcessOutcome, ProcessorConfig};
pub use reconcile::{PendingAnalyticalWrite, ReconcileStats, ReconciliationQueue, ReconciliationWorker};
pub use retry::{Retry, RetryConfig, RetryResult};
pub use sqlite::SqliteDurableStore;
pub use traits::{AnalyticalStore, AppendOutcome, DurableStore, RealtimeStore, SigningService};

#[cfg(test)]
pub use traits::{
    MockAnalyticalStore, MockDurableStore, MockRealtimeStore, MockSigningService,
};
