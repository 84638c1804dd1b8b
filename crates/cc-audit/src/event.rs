// event.rs — Audit event data model.
//
// Each event mirrors exactly one WAL entry. Its identity and timestamp come
// from that entry (`<workflow_id>-<sequence>`), so rebuilding events from
// the same WAL always produces the same bytes and the same chain hashes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cc_policy::{AggregationMethod, GatewayKind, PolicyEvaluation};
use cc_protocol::{hasher, Decision, EngineStatus, FailureKind, StepType, WorkflowState};

use crate::error::AuditError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditSeverity::Debug => "debug",
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<StepType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSection {
    pub engine_id: String,
    pub receipt_id: String,
    pub status: EngineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanTokenSection {
    pub token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<String>,
    pub aggregation_method: AggregationMethod,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,
    pub policy_evaluations: Vec<PolicyEvaluation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalSection {
    pub approval_id: String,
    pub plan_token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegritySection {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token_hash: Option<String>,
    /// Itemized differences between planned and executed artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Gateway verdicts that took part in a policy batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySection {
    pub gateway: GatewayKind,
    pub policy_ids: Vec<String>,
}

/// One audit event, one line in the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// `<workflow_id>-<sequence, zero-padded to 8>`.
    pub event_id: String,
    pub workflow_id: String,
    /// WAL sequence this event mirrors.
    pub sequence: u64,
    /// WAL entry type this event mirrors.
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AuditSeverity,
    /// Workflow state after the mirrored entry was applied.
    pub workflow_state: WorkflowState,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<PlanTokenSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_check: Option<IntegritySection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateway: Vec<GatewaySection>,

    /// Set by the emitter. Empty until emitted.
    #[serde(default)]
    pub chain_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_key_ref: Option<String>,
}

/// Fields excluded from the chained content.
const CHAIN_FIELDS: [&str; 3] = ["chain_hash", "signature", "signature_key_ref"];

impl AuditEvent {
    pub fn new(
        workflow_id: impl Into<String>,
        sequence: u64,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        workflow_state: WorkflowState,
    ) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            event_id: Self::event_id_for(&workflow_id, sequence),
            workflow_id,
            sequence,
            event_type: event_type.into(),
            timestamp,
            severity: AuditSeverity::Info,
            workflow_state,
            message: String::new(),
            workflow: None,
            engine: None,
            plan_token: None,
            artifacts: Vec::new(),
            policy: None,
            approval: None,
            integrity_check: None,
            gateway: Vec::new(),
            chain_hash: String::new(),
            signature: None,
            signature_key_ref: None,
        }
    }

    pub fn event_id_for(workflow_id: &str, sequence: u64) -> String {
        format!("{}-{:08}", workflow_id, sequence)
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_workflow(mut self, section: WorkflowSection) -> Self {
        self.workflow = Some(section);
        self
    }

    pub fn with_engine(mut self, section: EngineSection) -> Self {
        self.engine = Some(section);
        self
    }

    pub fn with_plan_token(mut self, section: PlanTokenSection) -> Self {
        self.plan_token = Some(section);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactRef>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_policy(mut self, section: PolicySection) -> Self {
        self.policy = Some(section);
        self
    }

    pub fn with_approval(mut self, section: ApprovalSection) -> Self {
        self.approval = Some(section);
        self
    }

    pub fn with_integrity(mut self, section: IntegritySection) -> Self {
        self.integrity_check = Some(section);
        self
    }

    pub fn with_gateway(mut self, sections: Vec<GatewaySection>) -> Self {
        self.gateway = sections;
        self
    }

    /// Canonical bytes of everything except the chain and signature fields.
    pub fn content_bytes(&self) -> Result<Vec<u8>, AuditError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            for field in CHAIN_FIELDS {
                map.remove(field);
            }
        }
        Ok(hasher::canonical_json(&value)?)
    }

    /// `SHA-256(previous ‖ content)`.
    pub fn compute_chain_hash(&self, previous: &str) -> Result<String, AuditError> {
        Ok(hasher::hash_chained(previous, &self.content_bytes()?))
    }
}
