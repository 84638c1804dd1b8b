// error.rs — Error types for the audit subsystem.

use std::path::PathBuf;

use cc_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the audit log file.
    #[error("failed to open audit log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to append audit event: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Recomputed chain hash disagrees with the stored one.
    #[error("audit chain broken at event {event_id}: expected {expected}, got {actual}")]
    ChainMismatch {
        event_id: String,
        expected: String,
        actual: String,
    },

    /// An event was emitted out of order for its workflow.
    #[error("audit event {event_id} has sequence {found}, but the chain head is already at {head}")]
    OutOfOrder {
        event_id: String,
        head: u64,
        found: u64,
    },

    #[error("signature on event {event_id} does not verify under key {key_ref}")]
    SignatureInvalid { event_id: String, key_ref: String },

    #[error("no verification key for key ref '{0}'")]
    UnknownKey(String),

    #[error("signing key rejected: {0}")]
    KeyRejected(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}
