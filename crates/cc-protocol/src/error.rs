// error.rs — Error types for the shared protocol crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while hashing or canonicalizing protocol records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A record could not be converted to canonical JSON.
    #[error("canonical serialization failed: {0}")]
    Canonicalization(#[from] serde_json::Error),

    /// Failed to read a file for hashing.
    #[error("failed to hash file at {path}: {source}")]
    HashFileFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A string did not name a known protocol value.
    #[error("unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },
}
