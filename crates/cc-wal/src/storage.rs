// storage.rs — Durable byte storage for WAL records.
//
// Storage knows nothing about checksums or sequences; it stores one line per
// record per workflow and hands them back in append order. `FileWalStorage`
// keeps one JSONL file per workflow under the WAL directory and syncs every
// append before returning.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::WalError;

/// One stored line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number within the workflow's log.
    pub line: usize,
    pub bytes: Vec<u8>,
    /// False for a final line that was never terminated (a torn write).
    pub complete: bool,
}

pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, WalError>> + Send>;

/// Backend for the write-ahead log.
pub trait WalStorage: Send + Sync {
    /// Append one record. Must not return `Ok` until the bytes are durable.
    fn append(&self, workflow_id: &str, record: &[u8]) -> Result<(), WalError>;

    /// Stored records for a workflow, lazily, in append order. Unknown
    /// workflows yield an empty iterator.
    fn records(&self, workflow_id: &str) -> Result<RecordIter, WalError>;

    /// Every workflow with at least one stored record, sorted.
    fn workflows(&self) -> Result<Vec<String>, WalError>;

    /// Drop a torn final line so the next append starts on a clean line.
    /// Returns whether anything was removed.
    fn truncate_torn_tail(&self, _workflow_id: &str) -> Result<bool, WalError> {
        Ok(false)
    }
}

/// Workflow ids become file names, so only a conservative alphabet is allowed.
pub fn validate_workflow_id(workflow_id: &str) -> Result<(), WalError> {
    let valid = !workflow_id.is_empty()
        && !workflow_id.starts_with('.')
        && workflow_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(WalError::InvalidWorkflowId(workflow_id.to_string()))
    }
}

/// One `<workflow_id>.wal` JSONL file per workflow.
#[derive(Debug, Clone)]
pub struct FileWalStorage {
    dir: PathBuf,
    sync: bool,
}

const WAL_EXTENSION: &str = "wal";

impl FileWalStorage {
    /// Open (creating if needed) a WAL directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| WalError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir, sync: true })
    }

    /// Disable `fsync` on append. Only for tests and throwaway runs.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, workflow_id: &str) -> Result<PathBuf, WalError> {
        validate_workflow_id(workflow_id)?;
        Ok(self.dir.join(format!("{}.{}", workflow_id, WAL_EXTENSION)))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WalError + '_ {
        move |source| WalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl WalStorage for FileWalStorage {
    fn append(&self, workflow_id: &str, record: &[u8]) -> Result<(), WalError> {
        let path = self.path_for(workflow_id)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Self::io_err(&path))?;

        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(b'\n');
        file.write_all(&line).map_err(Self::io_err(&path))?;
        if self.sync {
            file.sync_data().map_err(Self::io_err(&path))?;
        }
        Ok(())
    }

    fn records(&self, workflow_id: &str) -> Result<RecordIter, WalError> {
        let path = self.path_for(workflow_id)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(FileRecords {
                path,
                reader: BufReader::new(file),
                line: 0,
                done: false,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
            Err(source) => Err(WalError::Io { path, source }),
        }
    }

    fn workflows(&self) -> Result<Vec<String>, WalError> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(Self::io_err(&self.dir))?;
        for entry in entries {
            let entry = entry.map_err(Self::io_err(&self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(WAL_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_workflow_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn truncate_torn_tail(&self, workflow_id: &str) -> Result<bool, WalError> {
        let path = self.path_for(workflow_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(WalError::Io { path, source }),
        };
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
            .open(&path)
            .map_err(Self::io_err(&path))?;
        file.set_len(keep as u64).map_err(Self::io_err(&path))?;
        file.sync_all().map_err(Self::io_err(&path))?;
        tracing::warn!(
            workflow_id = %workflow_id,
            dropped_bytes = bytes.len() - keep,
            "truncated torn WAL tail"
        );
        Ok(true)
    }
}

struct FileRecords {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
    done: bool,
}

impl Iterator for FileRecords {
    type Item = Result<RawRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let complete = buf.last() == Some(&b'\n');
                    if complete {
                        buf.pop();
                    } else {
                        self.done = true;
                    }
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(Ok(RawRecord {
                        line: self.line,
                        bytes: buf,
                        complete,
                    }));
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(WalError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }
        None
    }
}

/// In-process storage for tests and ephemeral orchestrators.
#[derive(Debug, Default)]
pub struct MemoryWalStorage {
    logs: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
}

impl MemoryWalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record in place (0-based index). Used to simulate
    /// on-disk corruption.
    pub fn overwrite(&self, workflow_id: &str, index: usize, bytes: Vec<u8>) -> bool {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        match logs.get_mut(workflow_id).and_then(|log| log.get_mut(index)) {
            Some(slot) => {
                *slot = bytes;
                true
            }
            None => false,
        }
    }

    /// Raw copy of a workflow's records.
    pub fn snapshot(&self, workflow_id: &str) -> Vec<Vec<u8>> {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.get(workflow_id).cloned().unwrap_or_default()
    }
}

impl WalStorage for MemoryWalStorage {
    fn append(&self, workflow_id: &str, record: &[u8]) -> Result<(), WalError> {
        validate_workflow_id(workflow_id)?;
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.entry(workflow_id.to_string())
            .or_default()
            .push(record.to_vec());
        Ok(())
    }

    fn records(&self, workflow_id: &str) -> Result<RecordIter, WalError> {
        let records = self.snapshot(workflow_id);
        Ok(Box::new(records.into_iter().enumerate().map(|(i, bytes)| {
            Ok(RawRecord {
                line: i + 1,
                bytes,
                complete: true,
            })
        })))
    }

    fn workflows(&self) -> Result<Vec<String>, WalError> {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(logs
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}
