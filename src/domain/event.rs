//! The ledger event record
//!
//! This is the immutable-once-hashed unit of record. Events are constructed
//! in memory by the specialized constructors below, handed to the event
//! processor for hash linkage and signing, and never mutated after commit;
//! corrections are modeled as new compensating events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeviceId, EventType, Metadata, MetadataValue, SessionId, UserId};

/// A single audit log entry.
///
/// `previous_hash` and `event_hash` are empty until the event processor
/// links the event into the chain; `signature`/`signing_key_id` are populated
/// only for critical event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Globally unique event identifier, never reused
    pub event_id: Uuid,

    /// Creation time; informative, not chain-ordering authoritative
    pub timestamp: DateTime<Utc>,

    /// Event taxonomy value (`category.action`)
    pub event_type: EventType,

    /// Optional session correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Optional pseudonymized principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Optional acquisition device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,

    /// SHA-256 fingerprint of an associated payload (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,

    /// Type-specific attributes, keyed by convention
    #[serde(default)]
    pub metadata: Metadata,

    /// `event_hash` of the chain predecessor; all zeros for genesis
    #[serde(default)]
    pub previous_hash: String,

    /// SHA-256 over the canonical linkage fields; empty until computed
    #[serde(default)]
    pub event_hash: String,

    /// Ed25519 signature over `event_hash` (hex), critical types only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Identifier of the key that produced `signature`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

impl LedgerEvent {
    /// Create a bare event of the given type with a fresh identity.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            session_id: None,
            user_id: None,
            device_id: None,
            data_hash: None,
            metadata: Metadata::new(),
            previous_hash: String::new(),
            event_hash: String::new(),
            signature: None,
            signing_key_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_data_hash(mut self, data_hash: impl Into<String>) -> Self {
        self.data_hash = Some(data_hash.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True iff this event's type mandates a signature.
    pub fn is_critical(&self) -> bool {
        self.event_type.requires_signature()
    }

    /// True once the event has been linked and (if critical) signed.
    pub fn is_sealed(&self) -> bool {
        !self.event_hash.is_empty() && (!self.is_critical() || self.signature.is_some())
    }

    /// Serialize to the canonical map representation.
    pub fn to_value(&self) -> serde_json::Value {
        // A struct of scalars and string maps cannot fail to serialize
        serde_json::to_value(self).expect("ledger event serialization")
    }

    /// Deserialize from the canonical map representation.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    // ------------------------------------------------------------------
    // Specialized constructors. Each populates the metadata conventions
    // documented for its event type.
    // ------------------------------------------------------------------

    /// A critical `session.created` event.
    pub fn session_created(
        session_id: SessionId,
        user_id: Option<UserId>,
        device_id: Option<DeviceId>,
    ) -> Self {
        let mut event = Self::new(EventType::SessionCreated).with_session(session_id);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        if let Some(device_id) = device_id {
            event = event.with_device(device_id);
        }
        event
    }

    /// A critical `session.ended` event. `duration_secs` is the wall-clock
    /// session length.
    pub fn session_ended(session_id: SessionId, duration_secs: Option<f64>) -> Self {
        let mut event = Self::new(EventType::SessionEnded).with_session(session_id);
        if let Some(duration) = duration_secs {
            event = event.with_metadata("duration_secs", duration);
        }
        event
    }

    /// A `data.ingested` event. `data_hash` fingerprints the raw payload.
    pub fn data_ingested(
        session_id: SessionId,
        data_hash: impl Into<String>,
        data_size_bytes: u64,
        source: &str,
    ) -> Self {
        Self::new(EventType::DataIngested)
            .with_session(session_id)
            .with_data_hash(data_hash)
            .with_metadata("data_size_bytes", data_size_bytes)
            .with_metadata("source", source)
    }

    /// A critical `data.exported` event.
    pub fn data_exported(
        user_id: UserId,
        data_hash: impl Into<String>,
        destination: &str,
        record_count: u64,
    ) -> Self {
        Self::new(EventType::DataExported)
            .with_user(user_id)
            .with_data_hash(data_hash)
            .with_metadata("destination", destination)
            .with_metadata("record_count", record_count)
    }

    /// `device.connected`.
    pub fn device_connected(
        device_id: DeviceId,
        session_id: Option<SessionId>,
        device_model: &str,
        firmware_version: &str,
    ) -> Self {
        let mut event = Self::new(EventType::DeviceConnected)
            .with_device(device_id)
            .with_metadata("device_model", device_model)
            .with_metadata("firmware_version", firmware_version);
        if let Some(session_id) = session_id {
            event = event.with_session(session_id);
        }
        event
    }

    /// `device.disconnected`.
    pub fn device_disconnected(device_id: DeviceId, reason: &str) -> Self {
        Self::new(EventType::DeviceDisconnected)
            .with_device(device_id)
            .with_metadata("reason", reason)
    }

    /// `ml.inference`.
    pub fn ml_inference(
        session_id: SessionId,
        model_id: &str,
        model_version: &str,
        latency_ms: f64,
        confidence: Option<f64>,
    ) -> Self {
        let mut event = Self::new(EventType::MlInference)
            .with_session(session_id)
            .with_metadata("model_id", model_id)
            .with_metadata("model_version", model_version)
            .with_metadata("latency_ms", latency_ms);
        if let Some(confidence) = confidence {
            event = event.with_metadata("confidence", confidence);
        }
        event
    }

    /// A critical `access.granted` event.
    pub fn access_granted(user_id: UserId, resource: &str, ip_address: Option<&str>) -> Self {
        let mut event = Self::new(EventType::AccessGranted)
            .with_user(user_id)
            .with_metadata("resource", resource);
        if let Some(ip) = ip_address {
            event = event.with_metadata("ip_address", ip);
        }
        event
    }

    /// A critical `access.denied` event.
    pub fn access_denied(
        user_id: UserId,
        resource: &str,
        reason: &str,
        ip_address: Option<&str>,
    ) -> Self {
        let mut event = Self::new(EventType::AccessDenied)
            .with_user(user_id)
            .with_metadata("resource", resource)
            .with_metadata("reason", reason);
        if let Some(ip) = ip_address {
            event = event.with_metadata("ip_address", ip);
        }
        event
    }

    /// A critical `auth.success` event.
    pub fn auth_success(user_id: UserId, method: &str, ip_address: Option<&str>) -> Self {
        let mut event = Self::new(EventType::AuthSuccess)
            .with_user(user_id)
            .with_metadata("method", method);
        if let Some(ip) = ip_address {
            event = event.with_metadata("ip_address", ip);
        }
        event
    }

    /// A critical `auth.failure` event. The principal may be unknown on
    /// failure.
    pub fn auth_failure(
        user_id: Option<UserId>,
        method: &str,
        reason: &str,
        ip_address: Option<&str>,
    ) -> Self {
        let mut event = Self::new(EventType::AuthFailure)
            .with_metadata("method", method)
            .with_metadata("reason", reason);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        if let Some(ip) = ip_address {
            event = event.with_metadata("ip_address", ip);
        }
        event
    }
}
