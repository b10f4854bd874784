//! Core type definitions for the Neural Ledger
//!
//! Correlation identifiers, the typed metadata map, and the per-event
//! processing state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventCategory, EventType};

/// Session correlation identifier.
///
/// Sessions are recording/streaming sessions on the upstream platform; the
/// ledger treats them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pseudonymized principal identifier.
///
/// The upstream anonymizer replaces real identities before events reach the
/// ledger; this is never a raw user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Acquisition device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single metadata attribute value.
///
/// Metadata is an open map keyed by convention per event type, but values are
/// restricted to scalars so that canonical hashing stays unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(n) => Some(*n),
            MetadataValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Int(n)
    }
}

impl From<u64> for MetadataValue {
    fn from(n: u64) -> Self {
        // Saturate rather than wrap negative on overflow
        MetadataValue::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Float(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Open string-keyed metadata map.
///
/// A `BTreeMap` keeps iteration order stable, which keeps debug output and
/// serialized forms stable; canonical hashing does its own key ordering.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Per-event processing stage.
///
/// `Failed` at `Validated` is terminal (malformed input, no retry). `Failed`
/// at any later stage is retryable by the caller re-submitting the same
/// logical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Received,
    Validated,
    Linked,
    Signed,
    Persisting,
    Committed,
    Failed,
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStage::Received => "received",
            ProcessingStage::Validated => "validated",
            ProcessingStage::Linked => "linked",
            ProcessingStage::Signed => "signed",
            ProcessingStage::Persisting => "persisting",
            ProcessingStage::Committed => "committed",
            ProcessingStage::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Filter for real-time event queries against the low-latency tier.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub category: Option<EventCategory>,
    pub session_id: Option<SessionId>,
    pub user_id: Option<UserId>,
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Match all events.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Check whether an event passes this filter.
    pub fn matches(&self, event: &super::LedgerEvent) -> bool {
        if let Some(t) = self.event_type {
            if event.event_type != t {
                return false;
            }
        }
        if let Some(c) = self.category {
            if event.event_type.category() != c {
                return false;
            }
        }
        if let Some(s) = &self.session_id {
            if event.session_id.as_ref() != Some(s) {
                return false;
            }
        }
        if let Some(u) = &self.user_id {
            if event.user_id.as_ref() != Some(u) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_conversions() {
        assert_eq!(MetadataValue::from(42i64).as_i64(), Some(42));
        assert_eq!(MetadataValue::from(1.5).as_f64(), Some(1.5));
        assert_eq!(MetadataValue::from(true).as_bool(), Some(true));
        assert_eq!(MetadataValue::from("x").as_str(), Some("x"));
        // Int widens to float, but not the other way around
        assert_eq!(MetadataValue::from(2i64).as_f64(), Some(2.0));
        assert_eq!(MetadataValue::from(1.5).as_i64(), None);
        // Out-of-range u64 saturates instead of wrapping negative
        assert_eq!(MetadataValue::from(u64::MAX).as_i64(), Some(i64::MAX));
        assert_eq!(MetadataValue::from(7u64).as_i64(), Some(7));
    }

    #[test]
    fn test_metadata_value_untagged_roundtrip() {
        let values = vec![
            MetadataValue::Bool(false),
            MetadataValue::Int(-7),
            MetadataValue::Float(0.25),
            MetadataValue::Str("hello".to_string()),
        ];

        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let parsed: MetadataValue = serde_json::from_str(&json).unwrap();
            assert_eq!(value, parsed);
        }
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SessionId::from("sess-1").to_string(), "sess-1");
        assert_eq!(UserId::from("anon-9").to_string(), "anon-9");
        assert_eq!(DeviceId::from("dev-3").to_string(), "dev-3");
    }
}
