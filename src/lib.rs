//! Neural Ledger Library
//!
//! Append-only, hash-chained, digitally signed audit log for neural data
//! platforms. Every significant system event (session lifecycle, data
//! ingestion, device connection, ML inference, access control) is linked into
//! a single tamper-evident chain and fanned out to three storage tiers.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (events, event taxonomy, metadata)
//! - [`crypto`] - Hash chain, Merkle aggregation, Ed25519 signing
//! - [`infra`] - Storage tier traits and implementations, event processor
//! - [`ledger`] - The facade collaborators call (`log_event`, `verify_chain_integrity`)
//! - [`query`] - Read side: timelines, access logs, compliance reports
//! - [`consumer`] - At-least-once queue consumer loop
//! - [`metrics`] - Observability counters, gauges and latency histograms
//! - [`telemetry`] - Structured logging setup

pub mod config;
pub mod consumer;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod ledger;
pub mod metrics;
pub mod query;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    DeviceId, EventCategory, EventFilter, EventType, LedgerEvent, Metadata, MetadataValue,
    ProcessingStage, SessionId, UserId,
};

pub use crypto::{
    compute_data_hash, compute_event_hash, compute_merkle_root, find_chain_break, repair_chain,
    verify_chain, verify_event, EventSignature, KeyRing, GENESIS_HASH,
};

pub use infra::{
    AnalyticalStore, AppendOutcome, DurableStore, EventProcessor, HealthChecker, LedgerError,
    ProcessOutcome, RealtimeStore, Result, SigningService,
};

pub use ledger::{IntegrityReport, NeuralLedger};
pub use query::QueryService;
