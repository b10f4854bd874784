//! Event taxonomy for the Neural Ledger
//!
//! Closed enumeration of every recordable event type, namespaced as
//! `category.action`. Critical types must carry a digital signature before
//! they are considered durably committed.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Event category, the part before the dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Session,
    Data,
    Device,
    Ml,
    Auth,
    Access,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Session => "session",
            EventCategory::Data => "data",
            EventCategory::Device => "device",
            EventCategory::Ml => "ml",
            EventCategory::Auth => "auth",
            EventCategory::Access => "access",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of recordable event types.
///
/// Every value is `category.action` with exactly one dot. New types are a
/// schema change and must be added here, never free-formed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SessionCreated,
    SessionEnded,
    DataIngested,
    DataExported,
    DeviceConnected,
    DeviceDisconnected,
    MlInference,
    AuthSuccess,
    AuthFailure,
    AccessGranted,
    AccessDenied,
}

/// Parse failure for an event type string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl EventType {
    /// Every enumerated type, for exhaustive iteration in tests and reports.
    pub const ALL: [EventType; 11] = [
        EventType::SessionCreated,
        EventType::SessionEnded,
        EventType::DataIngested,
        EventType::DataExported,
        EventType::DeviceConnected,
        EventType::DeviceDisconnected,
        EventType::MlInference,
        EventType::AuthSuccess,
        EventType::AuthFailure,
        EventType::AccessGranted,
        EventType::AccessDenied,
    ];

    /// Types that must carry a signature before commit.
    pub const CRITICAL: [EventType; 7] = [
        EventType::SessionCreated,
        EventType::SessionEnded,
        EventType::DataExported,
        EventType::AccessGranted,
        EventType::AccessDenied,
        EventType::AuthSuccess,
        EventType::AuthFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionCreated => "session.created",
            EventType::SessionEnded => "session.ended",
            EventType::DataIngested => "data.ingested",
            EventType::DataExported => "data.exported",
            EventType::DeviceConnected => "device.connected",
            EventType::DeviceDisconnected => "device.disconnected",
            EventType::MlInference => "ml.inference",
            EventType::AuthSuccess => "auth.success",
            EventType::AuthFailure => "auth.failure",
            EventType::AccessGranted => "access.granted",
            EventType::AccessDenied => "access.denied",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventType::SessionCreated | EventType::SessionEnded => EventCategory::Session,
            EventType::DataIngested | EventType::DataExported => EventCategory::Data,
            EventType::DeviceConnected | EventType::DeviceDisconnected => EventCategory::Device,
            EventType::MlInference => EventCategory::Ml,
            EventType::AuthSuccess | EventType::AuthFailure => EventCategory::Auth,
            EventType::AccessGranted | EventType::AccessDenied => EventCategory::Access,
        }
    }

    /// The part after the dot.
    pub fn action(&self) -> &'static str {
        match self {
            EventType::SessionCreated => "created",
            EventType::SessionEnded => "ended",
            EventType::DataIngested => "ingested",
            EventType::DataExported => "exported",
            EventType::DeviceConnected => "connected",
            EventType::DeviceDisconnected => "disconnected",
            EventType::MlInference => "inference",
            EventType::AuthSuccess => "success",
            EventType::AuthFailure => "failure",
            EventType::AccessGranted => "granted",
            EventType::AccessDenied => "denied",
        }
    }

    /// True iff this type is in the critical set and must be signed.
    pub fn requires_signature(&self) -> bool {
        Self::CRITICAL.contains(self)
    }
}

/// Free-function form of the signature policy check.
pub fn requires_signature(event_type: EventType) -> bool {
    event_type.requires_signature()
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
