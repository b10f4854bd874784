//! Hash chain linkage and Merkle aggregation
//!
//! Pure, stateless functions over event sequences; no I/O. Event hashing uses
//! RFC 8785 JSON Canonicalization (JCS) so the digest is reproducible across
//! implementations regardless of key order:
//! - Deterministic key ordering (lexicographic UTF-8)
//! - ES6-compatible number serialization
//! - Stable timestamp encoding (RFC 3339, microsecond precision, UTC)

use chrono::SecondsFormat;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::LedgerEvent;

/// `previous_hash` of the genesis event: 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of raw bytes as a lowercase 64-char hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint an ingested payload. Bit-exact plain SHA-256, no domain prefix,
/// so external tooling can reproduce it with any stock implementation.
pub fn compute_data_hash(data: &[u8]) -> String {
    sha256_hex(data)
}

/// Convert a JSON value to its RFC 8785 canonical string form.
///
/// # Panics
///
/// Panics if the value contains a float that is not valid JSON (NaN or
/// Infinity). Metadata values are scalars, so ledger events never hit this.
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    serde_json_canonicalizer::to_string(value)
        .expect("canonical JSON: value contains NaN or Infinity")
}

/// The linkage-relevant fields of an event, as a canonical JSON value.
///
/// Excludes `event_hash`, `signature` and `signing_key_id`: the hash is
/// computed before those exist, and must stay stable when they are attached.
fn linkage_value(event: &LedgerEvent, previous_hash: &str) -> serde_json::Value {
    json!({
        "event_id": event.event_id.to_string(),
        "timestamp": event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "event_type": event.event_type.as_str(),
        "session_id": event.session_id,
        "user_id": event.user_id,
        "data_hash": event.data_hash,
        "metadata": event.metadata,
        "previous_hash": previous_hash,
    })
}

/// Compute the chain hash for an event linked to `previous_hash`.
///
/// Deterministic: recomputing from the stored fields always reproduces the
/// stored `event_hash`, which is what makes tampering detectable.
pub fn compute_event_hash(event: &LedgerEvent, previous_hash: &str) -> String {
    let canonical = canonicalize_json(&linkage_value(event, previous_hash));
    sha256_hex(canonical.as_bytes())
}

/// Recompute and compare a single event's hash against the given predecessor.
pub fn verify_event(event: &LedgerEvent, previous_hash: &str) -> bool {
    event.event_hash == compute_event_hash(event, previous_hash)
}

/// Verify an ordered event sequence end to end.
///
/// True iff every element's `previous_hash` literally equals its
/// predecessor's `event_hash` and every element's own hash recomputes.
/// An empty sequence verifies vacuously.
pub fn verify_chain(events: &[LedgerEvent]) -> bool {
    find_chain_break(events).is_none()
}

/// First index at which linkage or hash verification fails, if any.
///
/// The first element is checked for self-consistency only; a range fetched
/// from the middle of the chain does not start at genesis.
pub fn find_chain_break(events: &[LedgerEvent]) -> Option<usize> {
    let mut prev_hash: Option<&str> = None;

    for (index, event) in events.iter().enumerate() {
        if let Some(prev) = prev_hash {
            if event.previous_hash != prev {
                return Some(index);
            }
        }
        if !verify_event(event, &event.previous_hash) {
            return Some(index);
        }
        prev_hash = Some(&event.event_hash);
    }

    None
}

/// Rebuild linkage for an out-of-order or corrupted sequence.
///
/// Recomputes `previous_hash`/`event_hash` sequentially from genesis so the
/// result passes [`verify_chain`]. Operator-invoked incident-response tool,
/// never part of the write path. Signatures over rewritten hashes become
/// stale and must be re-issued through the signing service afterwards.
pub fn repair_chain(events: &[LedgerEvent]) -> Vec<LedgerEvent> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut repaired = Vec::with_capacity(events.len());

    for event in events {
        let mut event = event.clone();
        event.previous_hash = prev_hash.clone();
        event.event_hash = compute_event_hash(&event, &prev_hash);
        prev_hash = event.event_hash.clone();
        repaired.push(event);
    }

    repaired
}

/// Merkle root over the ordered `event_hash` values.
///
/// Binary tree, node = SHA-256 of the concatenated child hashes, duplicating
/// the last node when a level has odd cardinality. Empty input yields
/// [`GENESIS_HASH`]; a single leaf is its own root.
pub fn compute_merkle_root(events: &[LedgerEvent]) -> String {
    if events.is_empty() {
        return GENESIS_HASH.to_string();
    }

    let mut level: Vec<String> = events.iter().map(|e| e.event_hash.clone()).collect();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }

    level.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, SessionId, UserId};

    fn build_chain(n: usize) -> Vec<LedgerEvent> {
        let events: Vec<LedgerEvent> = (0..n)
            .map(|i| {
                LedgerEvent::new(EventType::DataIngested)
                    .with_session(SessionId::from("s-1"))
                    .with_metadata("seq", i as u64)
            })
            .collect();
        repair_chain(&events)
    }

    #[test]
    fn test_data_hash_matches_reference_sha256() {
        // Reference digest from a stock SHA-256 implementation
        let expected = hex::encode(Sha256::digest(b"Neural data packet 12345"));
        assert_eq!(compute_data_hash(b"Neural data packet 12345"), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn test_event_hash_is_deterministic() {
        let event = LedgerEvent::new(EventType::MlInference)
            .with_session(SessionId::from("s-1"))
            .with_metadata("model_id", "m-1");

        let h1 = compute_event_hash(&event, GENESIS_HASH);
        let h2 = compute_event_hash(&event, GENESIS_HASH);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_event_hash_excludes_signature_fields() {
        let mut event = LedgerEvent::access_granted(UserId::from("u"), "/r", None);
        let before = compute_event_hash(&event, GENESIS_HASH);

        event.signature = Some("ff".repeat(64));
        event.signing_key_id = Some("nlk-0001".to_string());
        event.event_hash = before.clone();

        assert_eq!(compute_event_hash(&event, GENESIS_HASH), before);
    }

    #[test]
    fn test_previous_hash_changes_event_hash() {
        let event = LedgerEvent::new(EventType::DataIngested);
        let h1 = compute_event_hash(&event, GENESIS_HASH);
        let h2 = compute_event_hash(&event, &"a".repeat(64));
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_verify_chain_empty_is_vacuously_true() {
        assert!(verify_chain(&[]));
        assert_eq!(find_chain_break(&[]), None);
    }

    #[test]
    fn test_repaired_chain_verifies() {
        let chain = build_chain(5);
        assert!(verify_chain(&chain));
        assert_eq!(chain[0].previous_hash, GENESIS_HASH);
        assert_eq!(chain[1].previous_hash, chain[0].event_hash);
    }

    #[test]
    fn test_metadata_mutation_breaks_chain_at_index() {
        let mut chain = build_chain(5);
        chain[2]
            .metadata
            .insert("seq".to_string(), 999u64.into());

        assert!(!verify_chain(&chain));
        assert_eq!(find_chain_break(&chain), Some(2));
    }

    #[test]
    fn test_linkage_mutation_detected() {
        let mut chain = build_chain(4);
        chain[3].previous_hash = "b".repeat(64);

        assert_eq!(find_chain_break(&chain), Some(3));
    }

    #[test]
    fn test_repair_recovers_tampered_chain() {
        let mut chain = build_chain(6);
        chain[1].metadata.insert("seq".to_string(), 42u64.into());
        assert!(!verify_chain(&chain));

        let repaired = repair_chain(&chain);
        assert!(verify_chain(&repaired));
        assert_eq!(repaired.len(), 6);
        // Event identity is preserved, only linkage is rewritten
        assert_eq!(repaired[1].event_id, chain[1].event_id);
    }

    #[test]
    fn test_merkle_root_empty_and_single() {
        assert_eq!(compute_merkle_root(&[]), GENESIS_HASH);

        let chain = build_chain(1);
        assert_eq!(compute_merkle_root(&chain), chain[0].event_hash);
    }

    #[test]
    fn test_merkle_root_deterministic_and_tamper_sensitive() {
        let chain = build_chain(5); // odd cardinality exercises last-node duplication
        let r1 = compute_merkle_root(&chain);
        let r2 = compute_merkle_root(&chain);
        assert_eq!(r1, r2);

        let mut altered = chain.clone();
        altered[4].event_hash = "c".repeat(64);
        assert_ne!(compute_merkle_root(&altered), r1);
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let chain = build_chain(4);
        let mut reversed = chain.clone();
        reversed.reverse();
        assert_ne!(compute_merkle_root(&chain), compute_merkle_root(&reversed));
    }

    #[test]
    fn test_canonicalization_key_order_independence() {
        let v1 = json!({"b": 2, "a": 1});
        let v2 = json!({"a": 1, "b": 2});
        assert_eq!(canonicalize_json(&v1), canonicalize_json(&v2));
        assert_eq!(canonicalize_json(&v1), r#"{"a":1,"b":2}"#);
    }
}
