// workflow.rs — Workflow: the governed lifecycle of one agent action.
//
// The state machine enforces:
//   INIT → PLAN_RUNNING → PLAN_GENERATED → TOKEN_CREATED → PRE_FLIGHT_RUNNING
//     → PREFLIGHT_COMPLETE → [AWAITING_APPROVAL → APPROVED] → READY_FOR_TAKEOFF
//     → TAKEOFF_RUNNING → EXECUTION_COMPLETE → ARTIFACTS_VALIDATED → COMPLETED
//   (or FAILED from any non-terminal state)
//
// A Workflow changes only by applying WAL entries. `plan` is the pure guard:
// it says which states an entry would move through, or why it is invalid,
// without touching anything. `apply` runs the same guard and then commits
// the effect. Only entry data and entry timestamps are read, so replaying a
// log always rebuilds the same Workflow.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cc_plantoken::PlanToken;
use cc_policy::{AggregationMethod, PolicyAggregator, PolicyEvaluationRecord};
use cc_protocol::{
    ApprovalRecord, ApprovalRequest, ArtifactRecord, Decision, EngineArtifact, EngineStatus,
    FailureKind, Metadata, StepType, WorkflowState,
};
use cc_wal::{PlanInputs, WalEntry, WalEntryData, WalError, PLAN_TOKEN_ARTIFACT_TYPE};

use crate::error::OrchestratorError;

/// One entry in the state history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChange {
    pub state: WorkflowState,
    /// WAL sequence that caused the change.
    pub sequence: u64,
    pub at: DateTime<Utc>,
}

/// A completed flight-plan run: everything needed to mint its plan token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlightPlanRecord {
    pub step_id: String,
    pub engine_id: String,
    pub protocol_version: String,
    pub artifacts: Vec<EngineArtifact>,
    pub inputs: PlanInputs,
    pub completed_at: DateTime<Utc>,
}

/// A completed take-off run, awaiting integrity verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TakeoffRecord {
    pub step_id: String,
    pub engine_id: String,
    pub artifacts: Vec<EngineArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// An engine step that reported failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub step_id: String,
    pub step_type: StepType,
    pub message: String,
}

/// Why a workflow ended in FAILED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub history: Vec<StateChange>,
    pub plan_token_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<PlanToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_plan: Option<FlightPlanRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub takeoff: Option<TakeoffRecord>,
    pub steps_completed: BTreeSet<String>,
    pub steps_pending: BTreeMap<String, StepType>,
    pub pending_approvals: BTreeMap<String, ApprovalRequest>,
    pub approvals: Vec<ApprovalRecord>,
    pub policy_evaluations: Vec<PolicyEvaluationRecord>,
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_failure: Option<StepFailure>,
    /// Approval id of a rejected approval awaiting its failure entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_rejected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Sequence of the last applied WAL entry (0 before the first).
    pub last_sequence: u64,
}

impl Workflow {
    /// A fresh workflow in INIT, before any entry has been applied.
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            state: WorkflowState::Init,
            history: Vec::new(),
            plan_token_hash: None,
            plan_token: None,
            flight_plan: None,
            takeoff: None,
            steps_completed: BTreeSet::new(),
            steps_pending: BTreeMap::new(),
            pending_approvals: BTreeMap::new(),
            approvals: Vec::new(),
            policy_evaluations: Vec::new(),
            artifacts: Vec::new(),
            last_decision: None,
            step_failure: None,
            approval_rejected: None,
            failure: None,
            metadata: Metadata::new(),
            created_at: None,
            updated_at: None,
            last_sequence: 0,
        }
    }

    /// Rebuild a workflow by applying replayed entries in order.
    pub fn replay<I>(workflow_id: impl Into<String>, entries: I) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = Result<WalEntry, WalError>>,
    {
        let mut workflow = Self::new(workflow_id);
        for entry in entries {
            workflow.apply(&entry?)?;
        }
        Ok(workflow)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// An automatic failure entry is owed before anything else may happen.
    pub fn failure_pending(&self) -> bool {
        self.step_failure.is_some()
            || self.approval_rejected.is_some()
            || (self.state == WorkflowState::PreFlightRunning
                && self.last_decision == Some(Decision::Deny))
    }

    /// Validate `data` against the current state and return the states it
    /// would move through, in order. Never mutates.
    pub fn plan(&self, data: &WalEntryData) -> Result<Vec<WorkflowState>, OrchestratorError> {
        use WorkflowState::*;

        if self.is_terminal() {
            return Err(OrchestratorError::Terminal {
                workflow_id: self.workflow_id.clone(),
                state: self.state,
            });
        }

        let reject = |reason: String| OrchestratorError::InvalidTransition {
            workflow_id: self.workflow_id.clone(),
            state: self.state,
            entry_type: data.entry_type().to_string(),
            reason,
        };
        let expect = |wanted: WorkflowState| {
            if self.state == wanted {
                Ok(())
            } else {
                Err(reject(format!("requires {}", wanted)))
            }
        };

        if self.failure_pending() && !matches!(data, WalEntryData::WorkflowFailed(_)) {
            return Err(reject("a failure is pending".into()));
        }

        match data {
            WalEntryData::WorkflowStarted(_) => {
                expect(Init)?;
                if self.last_sequence != 0 {
                    return Err(reject("workflow already started".into()));
                }
                Ok(vec![PlanRunning])
            }

            WalEntryData::StepStarted(step) => {
                if self.steps_pending.contains_key(&step.step_id)
                    || self.steps_completed.contains(&step.step_id)
                {
                    return Err(reject(format!("step id '{}' already used", step.step_id)));
                }
                match step.step_type {
                    StepType::FlightPlan => {
                        expect(PlanRunning)?;
                        if self.steps_pending.values().any(|t| *t == StepType::FlightPlan) {
                            return Err(reject("a flight-plan step is already running".into()));
                        }
                        Ok(vec![])
                    }
                    StepType::PreFlight => {
                        expect(TokenCreated)?;
                        Ok(vec![PreFlightRunning])
                    }
                    StepType::TakeOff => {
                        expect(ReadyForTakeoff)?;
                        Ok(vec![TakeoffRunning])
                    }
                }
            }

            WalEntryData::StepCompleted(done) => {
                match self.steps_pending.get(&done.step_id) {
                    Some(t) if *t == done.step_type => {}
                    Some(t) => {
                        return Err(reject(format!(
                            "step '{}' was started as {}, not {}",
                            done.step_id, t, done.step_type
                        )))
                    }
                    None => return Err(reject(format!("step '{}' was not started", done.step_id))),
                }
                let success = done.status == EngineStatus::Success;
                match done.step_type {
                    StepType::FlightPlan => {
                        expect(PlanRunning)?;
                        if !success {
                            return Ok(vec![]);
                        }
                        if done.plan_inputs.is_none() {
                            return Err(reject("flight-plan completion carries no plan inputs".into()));
                        }
                        Ok(vec![PlanGenerated])
                    }
                    StepType::TakeOff => {
                        expect(TakeoffRunning)?;
                        Ok(if success { vec![ExecutionComplete] } else { vec![] })
                    }
                    StepType::PreFlight => {
                        Err(reject("pre-flight steps complete through policy_evaluated".into()))
                    }
                }
            }

            WalEntryData::PolicyEvaluated(batch) => {
                expect(PreFlightRunning)?;
                if self.steps_pending.get(&batch.step_id) != Some(&StepType::PreFlight) {
                    return Err(reject(format!(
                        "'{}' is not a running pre-flight step",
                        batch.step_id
                    )));
                }
                if batch.evaluations.is_empty() {
                    return Err(reject("no policy evaluations".into()));
                }
                for evaluation in &batch.evaluations {
                    evaluation.validate().map_err(|e| reject(e.to_string()))?;
                }
                // A custom decision came from an external collaborator and
                // cannot be re-derived here.
                if batch.aggregation_method != AggregationMethod::Custom {
                    let derived = PolicyAggregator::new(batch.aggregation_method)
                        .aggregate(batch.evaluations.clone())
                        .map_err(|e| reject(e.to_string()))?;
                    if derived.decision != batch.decision
                        || derived.deciding_policy != batch.deciding_policy
                    {
                        return Err(reject(format!(
                            "recorded decision {} does not match {} aggregation ({})",
                            batch.decision, batch.aggregation_method, derived.decision
                        )));
                    }
                }
                Ok(match batch.decision {
                    Decision::Allow | Decision::Warn => vec![PreflightComplete, ReadyForTakeoff],
                    Decision::RequireApproval => vec![PreflightComplete, AwaitingApproval],
                    Decision::Deny => vec![],
                })
            }

            WalEntryData::ApprovalRequested(request) => {
                expect(AwaitingApproval)?;
                if request.workflow_id != self.workflow_id {
                    return Err(reject("request names another workflow".into()));
                }
                if self.plan_token_hash.as_deref() != Some(request.plan_token_hash.as_str()) {
                    return Err(reject("request is not bound to the current plan token".into()));
                }
                if self.pending_approvals.contains_key(&request.approval_id)
                    || self.approvals.iter().any(|a| a.approval_id == request.approval_id)
                {
                    return Err(reject(format!("approval id '{}' already used", request.approval_id)));
                }
                Ok(vec![])
            }

            WalEntryData::ApprovalReceived(record) => {
                expect(AwaitingApproval)?;
                let Some(request) = self.pending_approvals.get(&record.approval_id) else {
                    return Err(reject(format!(
                        "no pending request for approval '{}'",
                        record.approval_id
                    )));
                };
                if record.plan_token_hash != request.plan_token_hash
                    || self.plan_token_hash.as_deref() != Some(request.plan_token_hash.as_str())
                {
                    return Err(reject("approval is not bound to the current plan token".into()));
                }
                Ok(if record.approved {
                    vec![Approved, ReadyForTakeoff]
                } else {
                    vec![]
                })
            }

            WalEntryData::ArtifactCreated(artifact) => {
                if artifact.artifact_type != PLAN_TOKEN_ARTIFACT_TYPE {
                    return Ok(vec![]);
                }
                expect(PlanGenerated)?;
                match &artifact.plan_token {
                    Some(token) if token.token == artifact.artifact_hash => Ok(vec![TokenCreated]),
                    Some(_) => Err(reject("artifact hash differs from the plan token".into())),
                    None => Err(reject("plan-token artifact without a token".into())),
                }
            }

            WalEntryData::WorkflowCompleted(done) => {
                expect(ExecutionComplete)?;
                if done.final_state != Completed {
                    return Err(reject(format!("final state {} is not COMPLETED", done.final_state)));
                }
                if done.plan_token_hash != self.plan_token_hash {
                    return Err(reject("completion names a different plan token".into()));
                }
                Ok(vec![ArtifactsValidated, Completed])
            }

            WalEntryData::WorkflowFailed(_) => Ok(vec![Failed]),
        }
    }

    /// Apply one WAL entry. The entry must be the next in sequence.
    pub fn apply(&mut self, entry: &WalEntry) -> Result<(), OrchestratorError> {
        if entry.workflow_id != self.workflow_id {
            return Err(OrchestratorError::InvalidTransition {
                workflow_id: self.workflow_id.clone(),
                state: self.state,
                entry_type: entry.entry_type().to_string(),
                reason: format!("entry belongs to workflow '{}'", entry.workflow_id),
            });
        }
        if entry.sequence != self.last_sequence + 1 {
            return Err(OrchestratorError::OutOfSequence {
                workflow_id: self.workflow_id.clone(),
                expected: self.last_sequence + 1,
                found: entry.sequence,
            });
        }

        let path = self.plan(&entry.data)?;
        let at = entry.timestamp;

        match &entry.data {
            WalEntryData::WorkflowStarted(started) => {
                self.metadata = started.metadata.clone();
                self.plan_token_hash = None;
                self.created_at = Some(at);
            }
            WalEntryData::StepStarted(step) => {
                self.steps_pending.insert(step.step_id.clone(), step.step_type);
            }
            WalEntryData::StepCompleted(done) => {
                self.steps_pending.remove(&done.step_id);
                self.steps_completed.insert(done.step_id.clone());
                self.artifacts.extend(done.artifacts.iter().map(|a| ArtifactRecord {
                    artifact_id: format!("{}/{}", done.step_id, a.name),
                    step_id: Some(done.step_id.clone()),
                    artifact_hash: a.hash.clone(),
                    artifact_type: a.role.clone(),
                    created_at: at,
                }));
                if done.status == EngineStatus::Failure {
                    self.step_failure = Some(StepFailure {
                        step_id: done.step_id.clone(),
                        step_type: done.step_type,
                        message: done
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("engine '{}' reported failure", done.engine_id)),
                    });
                } else if done.step_type == StepType::FlightPlan {
                    if let Some(inputs) = &done.plan_inputs {
                        self.flight_plan = Some(FlightPlanRecord {
                            step_id: done.step_id.clone(),
                            engine_id: done.engine_id.clone(),
                            protocol_version: done.protocol_version.clone(),
                            artifacts: done.artifacts.clone(),
                            inputs: inputs.clone(),
                            completed_at: at,
                        });
                    }
                } else if done.step_type == StepType::TakeOff {
                    self.takeoff = Some(TakeoffRecord {
                        step_id: done.step_id.clone(),
                        engine_id: done.engine_id.clone(),
                        artifacts: done.artifacts.clone(),
                        plan_token: done.plan_token.clone(),
                        completed_at: at,
                    });
                }
            }
            WalEntryData::PolicyEvaluated(batch) => {
                self.steps_pending.remove(&batch.step_id);
                self.steps_completed.insert(batch.step_id.clone());
                self.policy_evaluations.push(PolicyEvaluationRecord {
                    evaluation_id: batch.evaluation_id.clone(),
                    step_id: batch.step_id.clone(),
                    aggregation_method: batch.aggregation_method,
                    decision: batch.decision,
                    policy_ids: batch.evaluations.iter().map(|e| e.policy_id.clone()).collect(),
                    deciding_policy: batch.deciding_policy.clone(),
                    evaluated_at: at,
                });
                self.last_decision = Some(batch.decision);
            }
            WalEntryData::ApprovalRequested(request) => {
                self.pending_approvals
                    .insert(request.approval_id.clone(), request.clone());
            }
            WalEntryData::ApprovalReceived(record) => {
                self.pending_approvals.remove(&record.approval_id);
                self.approvals.push(record.clone());
                if !record.approved {
                    self.approval_rejected = Some(record.approval_id.clone());
                }
            }
            WalEntryData::ArtifactCreated(artifact) => {
                self.artifacts.push(ArtifactRecord {
                    artifact_id: artifact.artifact_id.clone(),
                    step_id: artifact.step_id.clone(),
                    artifact_hash: artifact.artifact_hash.clone(),
                    artifact_type: artifact.artifact_type.clone(),
                    created_at: at,
                });
                if artifact.artifact_type == PLAN_TOKEN_ARTIFACT_TYPE {
                    self.plan_token_hash = Some(artifact.artifact_hash.clone());
                    self.plan_token = artifact.plan_token.clone();
                }
            }
            WalEntryData::WorkflowCompleted(_) => {}
            WalEntryData::WorkflowFailed(failed) => {
                self.failure = Some(FailureRecord {
                    kind: failed.error,
                    message: failed.message.clone(),
                    failed_step: failed.failed_step.clone(),
                    details: failed.details.clone(),
                    at,
                });
            }
        }

        for state in path {
            self.state = state;
            self.history.push(StateChange {
                state,
                sequence: entry.sequence,
                at,
            });
        }
        self.last_sequence = entry.sequence;
        self.updated_at = Some(at);
        Ok(())
    }
}
