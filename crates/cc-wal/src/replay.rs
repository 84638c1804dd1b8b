// replay.rs — Lazy, validating iteration over a workflow's WAL.
//
// Replay yields entries strictly in sequence order and stops at the first
// fault: a checksum mismatch, a sequence gap, or an undecodable record.
// Nothing after a fault is yielded. A final line that was never terminated
// is a write that was never acknowledged, so replay ends quietly before it.

use crate::entry::{WalEntry, WalRecord};
use crate::error::WalError;
use crate::storage::RecordIter;

pub struct WalReplay {
    workflow_id: String,
    records: RecordIter,
    expected: u64,
    done: bool,
}

impl WalReplay {
    pub(crate) fn new(workflow_id: impl Into<String>, records: RecordIter) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            records,
            expected: 1,
            done: false,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Sequence of the last entry yielded so far (0 if none).
    pub fn last_sequence(&self) -> u64 {
        self.expected - 1
    }

    fn corrupt(&self, line: usize, reason: impl ToString) -> WalError {
        WalError::CorruptRecord {
            workflow_id: self.workflow_id.clone(),
            line,
            reason: reason.to_string(),
        }
    }

    fn next_entry(&mut self) -> Option<Result<WalEntry, WalError>> {
        let raw = match self.records.next()? {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };

        if !raw.complete {
            tracing::warn!(
                workflow_id = %self.workflow_id,
                line = raw.line,
                "ignoring unterminated final WAL record"
            );
            return None;
        }

        let record: WalRecord = match serde_json::from_slice(&raw.bytes) {
            Ok(record) => record,
            Err(e) => return Some(Err(self.corrupt(raw.line, e))),
        };
        if record.workflow_id != self.workflow_id {
            return Some(Err(self.corrupt(
                raw.line,
                format!("record belongs to workflow '{}'", record.workflow_id),
            )));
        }
        if let Err(e) = record.verify_checksum() {
            return Some(Err(e));
        }
        if record.sequence != self.expected {
            return Some(Err(WalError::SequenceGap {
                workflow_id: self.workflow_id.clone(),
                expected: self.expected,
                found: record.sequence,
            }));
        }

        match WalEntry::from_record(record) {
            Ok(entry) => {
                self.expected += 1;
                Some(Ok(entry))
            }
            Err(e) => Some(Err(self.corrupt(raw.line, e))),
        }
    }
}

impl Iterator for WalReplay {
    type Item = Result<WalEntry, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_entry();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
