//! Ed25519 signing for critical ledger events
//!
//! The key ring holds every key the deployment has ever signed with, keyed by
//! key identifier. Rotation installs a new active key without interrupting
//! in-flight signs: verification resolves the key recorded at signing time,
//! never the currently active one, so old signatures stay verifiable.

use std::collections::HashMap;
use std::sync::RwLock;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Error type for signing operations
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("event hash is not a 32-byte hex digest")]
    InvalidDigestFormat,

    #[error("unknown signing key id: {0}")]
    UnknownKeyId(String),

    #[error("key ring lock poisoned")]
    KeyRingPoisoned,
}

/// A signature produced for a critical event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    /// Hex-encoded Ed25519 signature (128 chars)
    pub signature: String,
    /// Identifier of the key that was active at signing time
    pub key_id: String,
}

/// Ed25519 signing keypair.
#[derive(Clone)]
pub struct LedgerSigningKey {
    signing_key: SigningKey,
}

impl LedgerSigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> LedgerVerifyingKey {
        LedgerVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a 32-byte event hash digest.
    pub fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        self.signing_key.sign(digest).to_bytes()
    }
}

impl std::fmt::Debug for LedgerSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSigningKey")
            .field(
                "public_key",
                &hex::encode(self.signing_key.verifying_key().to_bytes()),
            )
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verification.
#[derive(Clone)]
pub struct LedgerVerifyingKey {
    verifying_key: VerifyingKey,
}

impl LedgerVerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SigningError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over a 32-byte digest.
    pub fn verify(&self, digest: &[u8; 32], signature: &[u8; 64]) -> bool {
        let sig = Signature::from_bytes(signature);
        self.verifying_key.verify(digest, &sig).is_ok()
    }
}

impl std::fmt::Debug for LedgerVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

struct KeyRingInner {
    keys: HashMap<String, LedgerSigningKey>,
    active_key_id: String,
    next_index: u32,
}

/// In-process signing key ring with rotation.
///
/// Retired keys are retained for verification. The lock is held only across
/// map lookups; the actual signing happens on a cloned key.
pub struct KeyRing {
    inner: RwLock<KeyRingInner>,
}

impl KeyRing {
    /// Create a key ring with one freshly generated active key.
    pub fn new() -> Self {
        let key_id = Self::key_id_for(1);
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), LedgerSigningKey::generate());

        Self {
            inner: RwLock::new(KeyRingInner {
                keys,
                active_key_id: key_id,
                next_index: 2,
            }),
        }
    }

    fn key_id_for(index: u32) -> String {
        format!("nlk-{index:04}")
    }

    /// Install a new active key; old keys remain verifiable.
    pub fn rotate(&self) -> Result<String, SigningError> {
        let mut inner = self.inner.write().map_err(|_| SigningError::KeyRingPoisoned)?;
        let key_id = Self::key_id_for(inner.next_index);
        inner.next_index += 1;
        inner.keys.insert(key_id.clone(), LedgerSigningKey::generate());
        inner.active_key_id = key_id.clone();
        Ok(key_id)
    }

    pub fn active_key_id(&self) -> Result<String, SigningError> {
        let inner = self.inner.read().map_err(|_| SigningError::KeyRingPoisoned)?;
        Ok(inner.active_key_id.clone())
    }

    /// Public key for a recorded key id, if the ring still holds it.
    pub fn verifying_key(&self, key_id: &str) -> Result<LedgerVerifyingKey, SigningError> {
        let inner = self.inner.read().map_err(|_| SigningError::KeyRingPoisoned)?;
        inner
            .keys
            .get(key_id)
            .map(LedgerSigningKey::verifying_key)
            .ok_or_else(|| SigningError::UnknownKeyId(key_id.to_string()))
    }

    fn digest_from_hex(event_hash: &str) -> Result<[u8; 32], SigningError> {
        let bytes = hex::decode(event_hash).map_err(|_| SigningError::InvalidDigestFormat)?;
        bytes.try_into().map_err(|_| SigningError::InvalidDigestFormat)
    }

    /// Sign an event hash with the currently active key.
    pub fn sign_hash(&self, event_hash: &str) -> Result<EventSignature, SigningError> {
        let digest = Self::digest_from_hex(event_hash)?;
        let (key, key_id) = {
            let inner = self.inner.read().map_err(|_| SigningError::KeyRingPoisoned)?;
            let key = inner
                .keys
                .get(&inner.active_key_id)
                .ok_or_else(|| SigningError::UnknownKeyId(inner.active_key_id.clone()))?
                .clone();
            (key, inner.active_key_id.clone())
        };

        Ok(EventSignature {
            signature: hex::encode(key.sign(&digest)),
            key_id,
        })
    }

    /// Verify a recorded signature against the key that produced it.
    pub fn verify_hash(
        &self,
        event_hash: &str,
        signature: &str,
        key_id: &str,
    ) -> Result<bool, SigningError> {
        let digest = Self::digest_from_hex(event_hash)?;
        let sig_bytes: [u8; 64] = hex::decode(signature)
            .map_err(|_| SigningError::InvalidSignatureFormat)?
            .try_into()
            .map_err(|_| SigningError::InvalidSignatureFormat)?;

        let key = self.verifying_key(key_id)?;
        Ok(key.verify(&digest, &sig_bytes))
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl crate::infra::SigningService for KeyRing {
    async fn sign(&self, event_hash: &str) -> crate::infra::Result<EventSignature> {
        Ok(self.sign_hash(event_hash)?)
    }

    async fn verify(
        &self,
        event_hash: &str,
        signature: &str,
        key_id: &str,
    ) -> crate::infra::Result<bool> {
        Ok(self.verify_hash(event_hash, signature, key_id)?)
    }

    async fn active_key_id(&self) -> crate::infra::Result<String> {
        Ok(KeyRing::active_key_id(self)?)
    }

    async fn ping(&self) -> crate::infra::Result<()> {
        KeyRing::active_key_id(self)?;
        Ok(())
    }
}
