// signer.rs — Optional signatures over audit chain hashes.
//
// Signing attests the chain hash, not the event body: the chain hash already
// commits to the content and to every earlier event. Verification goes
// through a `KeyService` reached by `signature_key_ref`, so keys can live in
// an external key-management system. `Ed25519Signer` covers the local case.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

use crate::error::AuditError;

/// Produces signatures over chain hashes.
pub trait ChainSigner: Send + Sync {
    /// Reference recorded as `signature_key_ref` on signed events.
    fn key_ref(&self) -> &str;

    /// Sign a chain hash, returning the encoded signature.
    fn sign(&self, chain_hash: &str) -> Result<String, AuditError>;
}

/// Verifies signatures for a key reference.
pub trait KeyService: Send + Sync {
    fn verify(&self, key_ref: &str, chain_hash: &str, signature: &str) -> Result<bool, AuditError>;
}

/// Ed25519 signer backed by a PKCS#8 key held in memory.
pub struct Ed25519Signer {
    key_ref: String,
    key_pair: Ed25519KeyPair,
}

impl Ed25519Signer {
    /// Generate a fresh PKCS#8 v2 document suitable for [`Self::from_pkcs8`].
    pub fn generate_pkcs8() -> Result<Vec<u8>, AuditError> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| AuditError::SigningFailed("key generation failed".into()))?;
        Ok(document.as_ref().to_vec())
    }

    pub fn from_pkcs8(key_ref: impl Into<String>, pkcs8: &[u8]) -> Result<Self, AuditError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| AuditError::KeyRejected(e.to_string()))?;
        Ok(Self {
            key_ref: key_ref.into(),
            key_pair,
        })
    }

    /// Load a raw (DER) PKCS#8 key from disk.
    pub fn from_pkcs8_file(key_ref: impl Into<String>, path: &Path) -> Result<Self, AuditError> {
        let bytes = std::fs::read(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs8(key_ref, &bytes)
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_ref", &self.key_ref)
            .finish_non_exhaustive()
    }
}

impl ChainSigner for Ed25519Signer {
    fn key_ref(&self) -> &str {
        &self.key_ref
    }

    fn sign(&self, chain_hash: &str) -> Result<String, AuditError> {
        let signature = self.key_pair.sign(chain_hash.as_bytes());
        Ok(BASE64.encode(signature.as_ref()))
    }
}

impl KeyService for Ed25519Signer {
    fn verify(&self, key_ref: &str, chain_hash: &str, signature: &str) -> Result<bool, AuditError> {
        if key_ref != self.key_ref {
            return Err(AuditError::UnknownKey(key_ref.to_string()));
        }
        let Ok(raw) = BASE64.decode(signature) else {
            return Ok(false);
        };
        let public_key = UnparsedPublicKey::new(&ED25519, self.public_key());
        Ok(public_key.verify(chain_hash.as_bytes(), &raw).is_ok())
    }
}
