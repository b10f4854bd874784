//! Cryptographic primitives for the Neural Ledger
//!
//! - [`hash`] - Hash chain linkage, tamper detection, Merkle aggregation
//! - [`signing`] - Ed25519 key ring with rotation-safe verification

pub mod hash;
pub mod signing;

pub use hash::{
    canonicalize_json, compute_data_hash, compute_event_hash, compute_merkle_root,
    find_chain_break, repair_chain, sha256_hex, verify_chain, verify_event, GENESIS_HASH,
};
pub use signing::{EventSignature, KeyRing, LedgerSigningKey, LedgerVerifyingKey, SigningError};
