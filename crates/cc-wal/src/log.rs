// log.rs — The write-ahead log: sequencing, sealing and durable append.
//
// Each workflow has its own tail (next sequence number) behind its own
// mutex, so appends to different workflows never contend. A tail is derived
// lazily by replaying the stored log the first time a workflow is touched in
// this process; an append whose storage write fails forgets the tail so the
// next append re-derives it from what actually reached disk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::entry::{WalEntry, WalEntryData};
use crate::error::WalError;
use crate::replay::WalReplay;
use crate::storage::WalStorage;

#[derive(Debug, Default)]
struct Tail {
    next_sequence: Option<u64>,
}

pub struct WriteAheadLog {
    storage: Arc<dyn WalStorage>,
    tails: Mutex<HashMap<String, Arc<Mutex<Tail>>>>,
}

impl WriteAheadLog {
    pub fn new(storage: Arc<dyn WalStorage>) -> Self {
        Self {
            storage,
            tails: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn WalStorage> {
        &self.storage
    }

    /// Append an entry stamped with the current time.
    pub fn append(&self, workflow_id: &str, data: WalEntryData) -> Result<WalEntry, WalError> {
        self.append_at(workflow_id, data, Utc::now())
    }

    /// Assign the next sequence, seal, and durably store an entry. The entry
    /// is returned only once storage reports it durable.
    pub fn append_at(
        &self,
        workflow_id: &str,
        data: WalEntryData,
        timestamp: DateTime<Utc>,
    ) -> Result<WalEntry, WalError> {
        let tail = self.tail(workflow_id);
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);

        let next = match tail.next_sequence {
            Some(next) => next,
            None => self.derive_next_sequence(workflow_id)?,
        };

        let entry = WalEntry::seal(workflow_id, next, data, timestamp)?;
        let line = entry.to_line()?;
        if let Err(e) = self.storage.append(workflow_id, &line) {
            tail.next_sequence = None;
            return Err(e);
        }
        tail.next_sequence = Some(next + 1);

        tracing::debug!(
            workflow_id = %workflow_id,
            sequence = entry.sequence,
            entry_type = %entry.entry_type(),
            "WAL entry appended"
        );
        Ok(entry)
    }

    /// Lazily replay a workflow's entries in sequence order. Call again to
    /// restart from the beginning.
    pub fn replay(&self, workflow_id: &str) -> Result<WalReplay, WalError> {
        Ok(WalReplay::new(workflow_id, self.storage.records(workflow_id)?))
    }

    /// Replay and collect, failing on the first fault.
    pub fn read_all(&self, workflow_id: &str) -> Result<Vec<WalEntry>, WalError> {
        self.replay(workflow_id)?.collect()
    }

    pub fn workflows(&self) -> Result<Vec<String>, WalError> {
        self.storage.workflows()
    }

    /// Sequence of the last durable entry (0 for an empty log).
    pub fn last_sequence(&self, workflow_id: &str) -> Result<u64, WalError> {
        let tail = self.tail(workflow_id);
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match tail.next_sequence {
            Some(next) => next,
            None => {
                let next = self.derive_next_sequence(workflow_id)?;
                tail.next_sequence = Some(next);
                next
            }
        };
        Ok(next - 1)
    }

    fn tail(&self, workflow_id: &str) -> Arc<Mutex<Tail>> {
        let mut tails = self.tails.lock().unwrap_or_else(PoisonError::into_inner);
        tails.entry(workflow_id.to_string()).or_default().clone()
    }

    // Refuses to extend a log that does not replay cleanly.
    fn derive_next_sequence(&self, workflow_id: &str) -> Result<u64, WalError> {
        self.storage.truncate_torn_tail(workflow_id)?;
        let mut replay = self.replay(workflow_id)?;
        for entry in replay.by_ref() {
            entry?;
        }
        Ok(replay.last_sequence() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{StepStarted, WalEntryType, WorkflowFailed, WorkflowStarted};
    use crate::storage::{FileWalStorage, MemoryWalStorage};
    use cc_protocol::{FailureKind, StepType, WorkflowState};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sec).unwrap()
    }

    fn started() -> WalEntryData {
        WalEntryData::WorkflowStarted(WorkflowStarted::new(WorkflowState::Init))
    }

    fn step(id: &str) -> WalEntryData {
        WalEntryData::StepStarted(StepStarted {
            step_id: id.into(),
            step_type: StepType::FlightPlan,
        })
    }

    #[test]
    fn sequences_are_per_workflow_and_gapless() {
        let wal = WriteAheadLog::new(Arc::new(MemoryWalStorage::new()));
        assert_eq!(wal.append("wf-a", started()).unwrap().sequence, 1);
        assert_eq!(wal.append("wf-a", step("plan-1")).unwrap().sequence, 2);
        assert_eq!(wal.append("wf-b", started()).unwrap().sequence, 1);
        assert_eq!(wal.append("wf-a", step("plan-2")).unwrap().sequence, 3);
        assert_eq!(wal.last_sequence("wf-a").unwrap(), 3);
        assert_eq!(wal.last_sequence("wf-b").unwrap(), 1);
        assert_eq!(wal.last_sequence("wf-none").unwrap(), 0);
    }

    #[test]
    fn replay_yields_exactly_what_was_appended() {
        let wal = WriteAheadLog::new(Arc::new(MemoryWalStorage::new()));
        let appended = vec![
            wal.append_at("wf-1", started(), ts(0)).unwrap(),
            wal.append_at("wf-1", step("plan-1"), ts(1)).unwrap(),
        ];
        assert_eq!(wal.read_all("wf-1").unwrap(), appended);
        // Replay is restartable.
        assert_eq!(wal.read_all("wf-1").unwrap(), appended);
    }

    #[test]
    fn forged_gap_is_detected_at_the_gap() {
        let storage = Arc::new(MemoryWalStorage::new());
        for (seq, data) in [(1, started()), (2, step("plan-1")), (4, step("plan-2"))] {
            let entry = WalEntry::seal("wf-gap", seq, data, ts(seq as u32)).unwrap();
            storage.append("wf-gap", &entry.to_line().unwrap()).unwrap();
        }
        let wal = WriteAheadLog::new(storage);

        let mut replay = wal.replay("wf-gap").unwrap();
        assert_eq!(replay.next().unwrap().unwrap().sequence, 1);
        assert_eq!(replay.next().unwrap().unwrap().sequence, 2);
        assert!(matches!(
            replay.next(),
            Some(Err(WalError::SequenceGap { expected: 3, found: 4, .. }))
        ));
        assert!(replay.next().is_none());
    }

    #[test]
    fn duplicate_sequence_is_a_gap() {
        let storage = Arc::new(MemoryWalStorage::new());
        for data in [started(), step("plan-1")] {
            let entry = WalEntry::seal("wf-dup", 1, data, ts(0)).unwrap();
            storage.append("wf-dup", &entry.to_line().unwrap()).unwrap();
        }
        let wal = WriteAheadLog::new(storage);
        let err = wal.read_all("wf-dup").unwrap_err();
        assert!(matches!(err, WalError::SequenceGap { expected: 2, found: 1, .. }));
        assert_eq!(err.failure_kind(), Some(FailureKind::SequenceGap));
    }

    #[test]
    fn tampered_payload_fails_checksum_and_stops_replay() {
        let storage = Arc::new(MemoryWalStorage::new());
        let wal = WriteAheadLog::new(storage.clone());
        wal.append_at("wf-t", started(), ts(0)).unwrap();
        wal.append_at("wf-t", step("plan-1"), ts(1)).unwrap();
        wal.append_at("wf-t", step("plan-2"), ts(2)).unwrap();

        let original = String::from_utf8(storage.snapshot("wf-t")[1].clone()).unwrap();
        let forged = original.replace("plan-1", "plan-X");
        assert!(storage.overwrite("wf-t", 1, forged.into_bytes()));

        let results: Vec<_> = WriteAheadLog::new(storage).replay("wf-t").unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(WalError::ChecksumMismatch { sequence: 2, .. })
        ));
    }

    #[test]
    fn corrupt_log_refuses_further_appends() {
        let storage = Arc::new(MemoryWalStorage::new());
        storage.append("wf-c", b"not json").unwrap();
        let wal = WriteAheadLog::new(storage);
        let err = wal.append("wf-c", started()).unwrap_err();
        assert!(err.is_integrity_fault());
    }

    #[test]
    fn file_log_survives_reopen_and_torn_tail() {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join("wal");
        {
            let wal = WriteAheadLog::new(Arc::new(FileWalStorage::open(&wal_dir).unwrap()));
            wal.append_at("wf-f", started(), ts(0)).unwrap();
            wal.append_at("wf-f", step("plan-1"), ts(1)).unwrap();
        }
        // Simulate a crash mid-append.
        {
            use std::io::Write;
            let path = wal_dir.join("wf-f.wal");
            let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            file.write_all(b"{\"sequence\":3,\"workflow").unwrap();
        }

        let wal = WriteAheadLog::new(Arc::new(FileWalStorage::open(&wal_dir).unwrap()));
        assert_eq!(wal.read_all("wf-f").unwrap().len(), 2);

        let failed = WalEntryData::WorkflowFailed(WorkflowFailed::new(
            FailureKind::EngineFailure,
            "engine crashed",
        ));
        let entry = wal.append_at("wf-f", failed, ts(2)).unwrap();
        assert_eq!(entry.sequence, 3);

        let entries = wal.read_all("wf-f").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].entry_type(), WalEntryType::WorkflowFailed);
        assert_eq!(wal.workflows().unwrap(), vec!["wf-f"]);
    }

    #[test]
    fn concurrent_appends_to_one_workflow_stay_gapless() {
        let wal = Arc::new(WriteAheadLog::new(Arc::new(MemoryWalStorage::new())));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let wal = wal.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        wal.append("wf-race", step(&format!("s-{}-{}", t, i))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let entries = wal.read_all("wf-race").unwrap();
        assert_eq!(entries.len(), 200);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence, i as u64 + 1);
        }
    }
}
