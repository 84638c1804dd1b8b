// sink.rs — Destinations for emitted audit events.
//
// `JsonlAuditSink` is an append-only JSONL file, one event per line, flushed
// after every event. On open it scans existing content to recover each
// workflow's chain head, so a restarted orchestrator keeps extending the
// same chains and knows which WAL sequences were already mirrored. A final
// line without its newline is what a crash mid-write leaves; it is dropped,
// and the orchestrator re-emits that event from the WAL.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::chain::ChainHead;
use crate::error::AuditError;
use crate::event::AuditEvent;

pub trait AuditSink: Send + Sync {
    /// Persist one emitted event.
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Last event persisted for a workflow, if any.
    fn head(&self, workflow_id: &str) -> Result<Option<ChainHead>, AuditError>;
}

struct JsonlState {
    writer: BufWriter<File>,
    heads: HashMap<String, ChainHead>,
}

/// An append-only audit log backed by a JSONL file.
pub struct JsonlAuditSink {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlAuditSink {
    /// Open (or create) an audit log, recovering chain heads from existing content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut heads = HashMap::new();
        if path.exists() {
            Self::truncate_torn_tail(&path)?;
            for event in Self::read_all(&path)? {
                heads.insert(event.workflow_id.clone(), ChainHead::of(&event));
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                writer: BufWriter::new(file),
                heads,
            }),
        })
    }

    /// Read all events from a log file, oldest first. Blank lines are
    /// skipped, as is an unterminated final line.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(i) => &bytes[..=i],
            None => &bytes[..0],
        };
        if complete.len() < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - complete.len(),
                "ignoring unterminated final audit line"
            );
        }

        let mut events = Vec::new();
        for line in complete.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            events.push(serde_json::from_slice(line)?);
        }
        Ok(events)
    }

    /// Cut an unterminated final line so new events start on a fresh line.
    fn truncate_torn_tail(path: &Path) -> Result<bool, AuditError> {
        let open_failed = |source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };
        let bytes = std::fs::read(path).map_err(open_failed)?;
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(false);
        }
        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(open_failed)?;
        file.set_len(keep as u64).map_err(open_failed)?;
        file.sync_all().map_err(open_failed)?;
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - keep,
            "truncated torn audit tail"
        );
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(state.writer, "{}", json)?;
        state.writer.flush()?;
        state
            .heads
            .insert(event.workflow_id.clone(), ChainHead::of(event));
        Ok(())
    }

    fn head(&self, workflow_id: &str) -> Result<Option<ChainHead>, AuditError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.heads.get(workflow_id).cloned())
    }
}

/// In-memory sink for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_for(&self, workflow_id: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn head(&self, workflow_id: &str) -> Result<Option<ChainHead>, AuditError> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .rev()
            .find(|e| e.workflow_id == workflow_id)
            .map(ChainHead::of))
    }
}
