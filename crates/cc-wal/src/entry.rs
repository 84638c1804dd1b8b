// entry.rs — WAL entries: typed payloads, wire records and checksums.
//
// On disk every entry is a `WalRecord`: a flat JSON object whose `data` field
// is kept as raw JSON so the checksum is always computed over exactly what
// was written. In memory the same entry is a `WalEntry` with a typed
// `WalEntryData` payload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cc_plantoken::PlanToken;
use cc_policy::{AggregationMethod, PolicyEvaluation};
use cc_protocol::{
    hasher, ApprovalRecord, ApprovalRequest, Decision, EngineArtifact, EngineStatus, FailureKind,
    Metadata, StepType, WorkflowState,
};

use crate::error::WalError;

/// `artifact_type` of the artifact_created entry that records a freshly minted plan token.
pub const PLAN_TOKEN_ARTIFACT_TYPE: &str = "plan_token";

/// Kind of state-changing event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryType {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    PolicyEvaluated,
    ApprovalRequested,
    ApprovalReceived,
    ArtifactCreated,
    WorkflowCompleted,
    WorkflowFailed,
}

impl WalEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            WalEntryType::WorkflowStarted => "workflow_started",
            WalEntryType::StepStarted => "step_started",
            WalEntryType::StepCompleted => "step_completed",
            WalEntryType::PolicyEvaluated => "policy_evaluated",
            WalEntryType::ApprovalRequested => "approval_requested",
            WalEntryType::ApprovalReceived => "approval_received",
            WalEntryType::ArtifactCreated => "artifact_created",
            WalEntryType::WorkflowCompleted => "workflow_completed",
            WalEntryType::WorkflowFailed => "workflow_failed",
        }
    }
}

impl fmt::Display for WalEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStarted {
    pub initial_state: WorkflowState,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl WorkflowStarted {
    pub fn new(initial_state: WorkflowState) -> Self {
        Self {
            initial_state,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepStarted {
    pub step_id: String,
    pub step_type: StepType,
}

/// Flight-plan context that is not part of the engine output but is bound
/// into the plan token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanInputs {
    pub workspace_hash: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
}

impl PlanInputs {
    pub fn new(workspace_hash: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            workspace_hash: workspace_hash.into(),
            model: model.into(),
            governance_hash: None,
            policy_digest: None,
        }
    }

    pub fn with_governance_hash(mut self, hash: impl Into<String>) -> Self {
        self.governance_hash = Some(hash.into());
        self
    }

    pub fn with_policy_digest(mut self, digest: impl Into<String>) -> Self {
        self.policy_digest = Some(digest.into());
        self
    }
}

/// An engine run finished (successfully or not).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepCompleted {
    pub step_id: String,
    pub step_type: StepType,
    pub engine_id: String,
    pub protocol_version: String,
    pub receipt_id: String,
    pub status: EngineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<EngineArtifact>,
    /// Plan token string the engine presented, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<String>,
    /// Minting inputs, for flight-plan steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_inputs: Option<PlanInputs>,
}

/// One aggregated batch of policy evaluations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyEvaluated {
    pub evaluation_id: String,
    pub step_id: String,
    pub aggregation_method: AggregationMethod,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,
    pub evaluations: Vec<PolicyEvaluation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactCreated {
    pub artifact_id: String,
    pub artifact_hash: String,
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Present when `artifact_type` is [`PLAN_TOKEN_ARTIFACT_TYPE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<PlanToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowCompleted {
    pub final_state: WorkflowState,
    /// Artifact ids validated against the plan token.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowFailed {
    pub error: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Itemized findings, e.g. artifact diffs for an integrity violation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl WorkflowFailed {
    pub fn new(error: FailureKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            failed_step: None,
            details: Vec::new(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.failed_step = Some(step_id.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

/// Typed entry payload, tagged by `entry_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entry_type", content = "data", rename_all = "snake_case")]
pub enum WalEntryData {
    WorkflowStarted(WorkflowStarted),
    StepStarted(StepStarted),
    StepCompleted(StepCompleted),
    PolicyEvaluated(PolicyEvaluated),
    ApprovalRequested(ApprovalRequest),
    ApprovalReceived(ApprovalRecord),
    ArtifactCreated(ArtifactCreated),
    WorkflowCompleted(WorkflowCompleted),
    WorkflowFailed(WorkflowFailed),
}

impl WalEntryData {
    pub fn entry_type(&self) -> WalEntryType {
        match self {
            WalEntryData::WorkflowStarted(_) => WalEntryType::WorkflowStarted,
            WalEntryData::StepStarted(_) => WalEntryType::StepStarted,
            WalEntryData::StepCompleted(_) => WalEntryType::StepCompleted,
            WalEntryData::PolicyEvaluated(_) => WalEntryType::PolicyEvaluated,
            WalEntryData::ApprovalRequested(_) => WalEntryType::ApprovalRequested,
            WalEntryData::ApprovalReceived(_) => WalEntryType::ApprovalReceived,
            WalEntryData::ArtifactCreated(_) => WalEntryType::ArtifactCreated,
            WalEntryData::WorkflowCompleted(_) => WalEntryType::WorkflowCompleted,
            WalEntryData::WorkflowFailed(_) => WalEntryType::WorkflowFailed,
        }
    }

    /// The untagged `data` object as it appears on disk.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    pub fn from_parts(entry_type: WalEntryType, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "entry_type": entry_type, "data": data }))
    }
}

/// On-disk form of one entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalRecord {
    pub sequence: u64,
    pub workflow_id: String,
    pub entry_type: WalEntryType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    workflow_id: &'a str,
    entry_type: WalEntryType,
    data: &'a Value,
    timestamp: &'a DateTime<Utc>,
    sequence: u64,
}

impl WalRecord {
    /// SHA-256 over the canonical JSON of everything except `checksum`.
    pub fn compute_checksum(&self) -> Result<String, WalError> {
        Ok(hasher::hash_canonical(&ChecksumInput {
            workflow_id: &self.workflow_id,
            entry_type: self.entry_type,
            data: &self.data,
            timestamp: &self.timestamp,
            sequence: self.sequence,
        })?)
    }

    /// Check the stored checksum against the record's content.
    pub fn verify_checksum(&self) -> Result<(), WalError> {
        let actual = self.compute_checksum()?;
        if actual != self.checksum {
            return Err(WalError::ChecksumMismatch {
                workflow_id: self.workflow_id.clone(),
                sequence: self.sequence,
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// A sealed, checksummed WAL entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub sequence: u64,
    pub workflow_id: String,
    pub data: WalEntryData,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
}

impl WalEntry {
    /// Build an entry and compute its checksum.
    ///
    /// [`WriteAheadLog::append`](crate::WriteAheadLog::append) is the normal
    /// way to create entries; sealing directly is for tooling and tests that
    /// need to forge a record.
    pub fn seal(
        workflow_id: impl Into<String>,
        sequence: u64,
        data: WalEntryData,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, WalError> {
        let mut record = WalRecord {
            sequence,
            workflow_id: workflow_id.into(),
            entry_type: data.entry_type(),
            data: data.to_value()?,
            timestamp,
            checksum: String::new(),
        };
        record.checksum = record.compute_checksum()?;
        Ok(Self {
            sequence,
            workflow_id: record.workflow_id,
            data,
            timestamp,
            checksum: record.checksum,
        })
    }

    pub fn entry_type(&self) -> WalEntryType {
        self.data.entry_type()
    }

    pub fn to_record(&self) -> Result<WalRecord, WalError> {
        Ok(WalRecord {
            sequence: self.sequence,
            workflow_id: self.workflow_id.clone(),
            entry_type: self.entry_type(),
            data: self.data.to_value()?,
            timestamp: self.timestamp,
            checksum: self.checksum.clone(),
        })
    }

    /// Decode a record whose checksum has already been verified.
    pub fn from_record(record: WalRecord) -> Result<Self, serde_json::Error> {
        let data = WalEntryData::from_parts(record.entry_type, record.data)?;
        Ok(Self {
            sequence: record.sequence,
            workflow_id: record.workflow_id,
            data,
            timestamp: record.timestamp,
            checksum: record.checksum,
        })
    }

    /// One JSON line, without the trailing newline.
    pub fn to_line(&self) -> Result<Vec<u8>, WalError> {
        Ok(serde_json::to_vec(&self.to_record()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn started() -> WalEntryData {
        WalEntryData::WorkflowStarted(WorkflowStarted::new(WorkflowState::Init))
    }

    #[test]
    fn wire_form_is_flat_with_raw_data() {
        let entry = WalEntry::seal("wf-1", 1, started(), ts()).unwrap();
        let record: Value = serde_json::from_slice(&entry.to_line().unwrap()).unwrap();
        assert_eq!(record["entry_type"], json!("workflow_started"));
        assert_eq!(record["data"]["initial_state"], json!("INIT"));
        assert_eq!(record["sequence"], json!(1));
        assert_eq!(record["checksum"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn checksum_covers_every_field() {
        let entry = WalEntry::seal("wf-1", 1, started(), ts()).unwrap();
        let base = entry.to_record().unwrap();
        assert!(base.verify_checksum().is_ok());

        let mut seq = base.clone();
        seq.sequence = 2;
        let mut wf = base.clone();
        wf.workflow_id = "wf-2".into();
        let mut when = base.clone();
        when.timestamp = ts() + chrono::Duration::seconds(1);
        let mut data = base.clone();
        data.data["initial_state"] = json!("PLAN_RUNNING");
        let mut kind = base.clone();
        kind.entry_type = WalEntryType::StepStarted;

        for tampered in [seq, wf, when, data, kind] {
            assert!(matches!(
                tampered.verify_checksum(),
                Err(WalError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn record_decodes_back_to_typed_payload() {
        let failed = WalEntryData::WorkflowFailed(
            WorkflowFailed::new(FailureKind::PolicyDenied, "denied by opa.net").with_step("preflight-1"),
        );
        let entry = WalEntry::seal("wf-1", 7, failed, ts()).unwrap();
        let decoded = WalEntry::from_record(entry.to_record().unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.entry_type(), WalEntryType::WorkflowFailed);
    }

    #[test]
    fn mismatched_payload_shape_is_rejected() {
        let err = WalEntryData::from_parts(WalEntryType::StepStarted, json!({"initial_state": "INIT"}));
        assert!(err.is_err());
    }
}
