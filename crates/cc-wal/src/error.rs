// error.rs — Error types for the write-ahead log.

use std::path::PathBuf;

use cc_protocol::{FailureKind, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    /// A storage file could not be opened, written or synced.
    #[error("WAL I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("WAL serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An entry's content no longer matches its checksum.
    #[error("checksum mismatch in workflow {workflow_id} at sequence {sequence}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        workflow_id: String,
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// Sequence numbers skipped or repeated.
    #[error("sequence gap in workflow {workflow_id}: expected {expected}, found {found}")]
    SequenceGap {
        workflow_id: String,
        expected: u64,
        found: u64,
    },

    /// A complete record could not be decoded at all.
    #[error("corrupt WAL record in workflow {workflow_id} at line {line}: {reason}")]
    CorruptRecord {
        workflow_id: String,
        line: usize,
        reason: String,
    },

    /// Workflow ids double as file names, so they are restricted.
    #[error("invalid workflow id '{0}': use ASCII letters, digits, '-', '_' or '.'")]
    InvalidWorkflowId(String),
}

impl WalError {
    /// Whether this error means the log itself cannot be trusted.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            WalError::ChecksumMismatch { .. }
                | WalError::SequenceGap { .. }
                | WalError::CorruptRecord { .. }
        )
    }

    /// The taxonomy tag for integrity faults.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            WalError::ChecksumMismatch { .. } | WalError::CorruptRecord { .. } => {
                Some(FailureKind::ChecksumMismatch)
            }
            WalError::SequenceGap { .. } => Some(FailureKind::SequenceGap),
            _ => None,
        }
    }
}
