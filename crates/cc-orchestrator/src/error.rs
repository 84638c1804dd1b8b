// error.rs — Error types for the orchestrator and approval binding.

use std::path::PathBuf;

use cc_audit::AuditError;
use cc_plantoken::PlanTokenError;
use cc_policy::PolicyError;
use cc_protocol::{FailureKind, WorkflowState};
use cc_wal::WalError;
use thiserror::Error;

/// Failures of the Approval Binding Manager.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("workflow {workflow_id} is in {state}, not AWAITING_APPROVAL")]
    NotAwaitingApproval {
        workflow_id: String,
        state: WorkflowState,
    },

    #[error("workflow {workflow_id} has no plan token to bind an approval to")]
    NoPlanToken { workflow_id: String },

    #[error("unknown approval id: {0}")]
    UnknownApproval(String),

    /// The response is not bound to the plan the request was issued for.
    #[error("approval {approval_id} rejected as replay: {reason}")]
    ReplayRejected { approval_id: String, reason: String },

    #[error("approver '{approver}' does not hold required role '{required_role}'")]
    RoleNotSatisfied {
        approver: String,
        required_role: String,
    },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    PlanToken(#[from] PlanTokenError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    /// The workflow's WAL failed integrity checks; it needs an operator.
    #[error("workflow {workflow_id} is quarantined ({kind}): {reason}")]
    Quarantined {
        workflow_id: String,
        kind: FailureKind,
        reason: String,
    },

    #[error("workflow {workflow_id} is terminal ({state})")]
    Terminal {
        workflow_id: String,
        state: WorkflowState,
    },

    /// An entry is not valid in the workflow's current state.
    #[error("invalid {entry_type} in {state} for workflow {workflow_id}: {reason}")]
    InvalidTransition {
        workflow_id: String,
        state: WorkflowState,
        entry_type: String,
        reason: String,
    },

    #[error("entry for workflow {workflow_id} has sequence {found}, expected {expected}")]
    OutOfSequence {
        workflow_id: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid engine output: {0}")]
    InvalidEngineOutput(String),
}

impl OrchestratorError {
    /// Taxonomy tag, where the error has one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OrchestratorError::Wal(e) => e.failure_kind(),
            OrchestratorError::Approval(ApprovalError::ReplayRejected { .. }) => {
                Some(FailureKind::ReplayRejected)
            }
            OrchestratorError::PlanToken(PlanTokenError::MalformedArtifactSet { .. }) => {
                Some(FailureKind::MalformedArtifactSet)
            }
            OrchestratorError::PlanToken(PlanTokenError::UnsupportedTokenVersion { .. }) => {
                Some(FailureKind::UnsupportedTokenVersion)
            }
            OrchestratorError::Quarantined { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
