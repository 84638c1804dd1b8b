// hasher.rs — SHA-256 and canonical-JSON hashing.
//
// All digests in CabinCrew are SHA-256, lowercase hex. Structured records are
// hashed over their canonical JSON form: the record is first lowered to a
// `serde_json::Value`, whose object maps are ordered by key, and then written
// without whitespace. Two records with equal content always hash equally no
// matter how their fields were declared or received.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash the contents of a file on disk.
pub fn hash_file(path: &Path) -> Result<String, ProtocolError> {
    let data = std::fs::read(path).map_err(|source| ProtocolError::HashFileFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hash_bytes(&data))
}

/// Serialize `value` to canonical JSON bytes (sorted keys, no whitespace).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    // `Value`'s map type is a BTreeMap, so lowering through it sorts every
    // object's keys regardless of struct field order.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// SHA-256 over the canonical JSON form of `value`.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<String, ProtocolError> {
    Ok(hash_bytes(&canonical_json(value)?))
}

/// Chain a digest onto a predecessor: `SHA-256(previous ‖ content)`.
pub fn hash_chained(previous: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
