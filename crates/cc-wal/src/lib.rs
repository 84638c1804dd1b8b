//! # cc-wal
//!
//! Append-only, checksummed, sequenced journal of every state-changing
//! workflow event. The WAL is the sole source of truth for recovery: on
//! restart, each workflow is rebuilt by replaying its entries through the
//! same transition function used during live operation.
//!
//! ## Key invariants
//!
//! - **Gapless sequences**: per workflow, sequences start at 1 and increase by
//!   exactly one. A gap or duplicate at replay is [`WalError::SequenceGap`].
//! - **Checksums**: each entry's checksum covers
//!   `{workflow_id, entry_type, data, timestamp, sequence}`. A mismatch is
//!   [`WalError::ChecksumMismatch`] and nothing past it is trusted.
//! - **Durable before visible**: [`WriteAheadLog::append`] returns only after
//!   the storage backend reports the record durable.
//!
//! ```rust
//! use std::sync::Arc;
//! use cc_protocol::WorkflowState;
//! use cc_wal::{MemoryWalStorage, WalEntryData, WorkflowStarted, WriteAheadLog};
//!
//! let wal = WriteAheadLog::new(Arc::new(MemoryWalStorage::new()));
//! let entry = wal
//!     .append("wf-1", WalEntryData::WorkflowStarted(WorkflowStarted::new(WorkflowState::Init)))
//!     .unwrap();
//! assert_eq!(entry.sequence, 1);
//! let replayed: Vec<_> = wal.replay("wf-1").unwrap().collect::<Result<_, _>>().unwrap();
//! assert_eq!(replayed, vec![entry]);
//! ```

pub mod entry;
pub mod error;
pub mod log;
pub mod replay;
pub mod storage;

pub use entry::{
    ArtifactCreated, PlanInputs, PolicyEvaluated, StepCompleted, StepStarted, WalEntry,
    WalEntryData, WalEntryType, WalRecord, WorkflowCompleted, WorkflowFailed, WorkflowStarted,
    PLAN_TOKEN_ARTIFACT_TYPE,
};
pub use error::WalError;
pub use log::WriteAheadLog;
pub use replay::WalReplay;
pub use storage::{FileWalStorage, MemoryWalStorage, RawRecord, RecordIter, WalStorage};
