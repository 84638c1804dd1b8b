// state.rs — Workflow lifecycle states and the failure taxonomy.
//
//   INIT → PLAN_RUNNING → PLAN_GENERATED → TOKEN_CREATED → PRE_FLIGHT_RUNNING
//     → PREFLIGHT_COMPLETE → [AWAITING_APPROVAL → APPROVED] → READY_FOR_TAKEOFF
//     → TAKEOFF_RUNNING → EXECUTION_COMPLETE → ARTIFACTS_VALIDATED → COMPLETED
//   (or FAILED from any non-terminal state)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// The lifecycle state of a governed workflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Init,
    PlanRunning,
    PlanGenerated,
    TokenCreated,
    PreFlightRunning,
    PreflightComplete,
    AwaitingApproval,
    Approved,
    ReadyForTakeoff,
    TakeoffRunning,
    ExecutionComplete,
    ArtifactsValidated,
    Completed,
    Failed,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 14] = [
        WorkflowState::Init,
        WorkflowState::PlanRunning,
        WorkflowState::PlanGenerated,
        WorkflowState::TokenCreated,
        WorkflowState::PreFlightRunning,
        WorkflowState::PreflightComplete,
        WorkflowState::AwaitingApproval,
        WorkflowState::Approved,
        WorkflowState::ReadyForTakeoff,
        WorkflowState::TakeoffRunning,
        WorkflowState::ExecutionComplete,
        WorkflowState::ArtifactsValidated,
        WorkflowState::Completed,
        WorkflowState::Failed,
    ];

    /// `COMPLETED` and `FAILED` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Init => "INIT",
            WorkflowState::PlanRunning => "PLAN_RUNNING",
            WorkflowState::PlanGenerated => "PLAN_GENERATED",
            WorkflowState::TokenCreated => "TOKEN_CREATED",
            WorkflowState::PreFlightRunning => "PRE_FLIGHT_RUNNING",
            WorkflowState::PreflightComplete => "PREFLIGHT_COMPLETE",
            WorkflowState::AwaitingApproval => "AWAITING_APPROVAL",
            WorkflowState::Approved => "APPROVED",
            WorkflowState::ReadyForTakeoff => "READY_FOR_TAKEOFF",
            WorkflowState::TakeoffRunning => "TAKEOFF_RUNNING",
            WorkflowState::ExecutionComplete => "EXECUTION_COMPLETE",
            WorkflowState::ArtifactsValidated => "ARTIFACTS_VALIDATED",
            WorkflowState::Completed => "COMPLETED",
            WorkflowState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| ProtocolError::UnknownValue {
                kind: "workflow state",
                value: s.to_string(),
            })
    }
}

/// Why a workflow failed. Carried by every `workflow_failed` WAL entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Two plan artifacts shared a name.
    MalformedArtifactSet,
    /// A persisted plan-token carries a format version this codec does not speak.
    UnsupportedTokenVersion,
    /// A WAL record's checksum did not match its content.
    ChecksumMismatch,
    /// WAL sequence numbers skipped or repeated.
    SequenceGap,
    /// An approval response was bound to a different plan-token.
    ReplayRejected,
    /// Executed artifacts did not match the plan-token.
    IntegrityViolation,
    /// Pre-flight policy aggregation returned `deny`.
    PolicyDenied,
    /// An engine adapter reported failure.
    EngineFailure,
    /// The approver rejected the plan.
    ApprovalDenied,
    /// An operator cancelled the workflow.
    Cancelled,
}

impl FailureKind {
    /// Log-integrity failures quarantine the workflow instead of failing it:
    /// the log past the fault cannot be trusted to record anything.
    pub fn is_orchestrator_fatal(self) -> bool {
        matches!(self, FailureKind::ChecksumMismatch | FailureKind::SequenceGap)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MalformedArtifactSet => "malformed_artifact_set",
            FailureKind::UnsupportedTokenVersion => "unsupported_token_version",
            FailureKind::ChecksumMismatch => "checksum_mismatch",
            FailureKind::SequenceGap => "sequence_gap",
            FailureKind::ReplayRejected => "replay_rejected",
            FailureKind::IntegrityViolation => "integrity_violation",
            FailureKind::PolicyDenied => "policy_denied",
            FailureKind::EngineFailure => "engine_failure",
            FailureKind::ApprovalDenied => "approval_denied",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
