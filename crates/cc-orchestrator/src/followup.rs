// followup.rs — Entries the orchestrator appends on its own.
//
// Some transitions are consequences of the entry before them: a generated
// flight plan gets its plan token minted, a deny decision fails the
// workflow, a finished take-off is verified against the plan token. Each of
// those consequences is its own WAL entry, computed here purely from the
// workflow. Live operation and crash recovery both call `next_entry` until
// it returns None, so a crash between an entry and its consequence is
// finished on restart with the same result.

use cc_plantoken::{diff_artifacts, PlanArtifactHash, PlanContext, PlanTokenCodec, PlanTokenError};
use cc_protocol::{Decision, FailureKind, WorkflowState};
use cc_wal::{
    ArtifactCreated, WalEntryData, WorkflowCompleted, WorkflowFailed, PLAN_TOKEN_ARTIFACT_TYPE,
};

use crate::workflow::{FlightPlanRecord, Workflow};

/// The next automatic entry owed by `workflow`, if any.
pub fn next_entry(workflow: &Workflow, codec: &PlanTokenCodec) -> Option<WalEntryData> {
    if workflow.is_terminal() {
        return None;
    }

    if let Some(failure) = &workflow.step_failure {
        return Some(failed(
            WorkflowFailed::new(
                FailureKind::EngineFailure,
                format!("{} step '{}' failed: {}", failure.step_type, failure.step_id, failure.message),
            )
            .with_step(&failure.step_id),
        ));
    }

    if let Some(approval_id) = &workflow.approval_rejected {
        let record = workflow.approvals.iter().find(|a| &a.approval_id == approval_id);
        let message = match record {
            Some(r) => format!("approval '{}' rejected by {}", approval_id, r.approver),
            None => format!("approval '{}' rejected", approval_id),
        };
        let mut entry = WorkflowFailed::new(FailureKind::ApprovalDenied, message);
        if let Some(r) = record {
            entry = entry.with_step(&r.step_id);
            if let Some(reason) = &r.reason {
                entry = entry.with_details(vec![reason.clone()]);
            }
        }
        return Some(failed(entry));
    }

    match workflow.state {
        WorkflowState::PlanGenerated => workflow.flight_plan.as_ref().map(|fp| mint(fp, codec)),
        WorkflowState::PreFlightRunning if workflow.last_decision == Some(Decision::Deny) => {
            Some(denied(workflow))
        }
        WorkflowState::ExecutionComplete => Some(verify_integrity(workflow, codec)),
        _ => None,
    }
}

fn failed(entry: WorkflowFailed) -> WalEntryData {
    WalEntryData::WorkflowFailed(entry)
}

// Minted at the flight plan's completion time, so recovery mints the same token.
fn mint(flight_plan: &FlightPlanRecord, codec: &PlanTokenCodec) -> WalEntryData {
    let inputs = &flight_plan.inputs;
    let mut context = PlanContext::new(
        flight_plan.artifacts.iter().map(PlanArtifactHash::from).collect(),
        &inputs.workspace_hash,
        &flight_plan.engine_id,
        &inputs.model,
        &flight_plan.protocol_version,
    );
    if let Some(hash) = &inputs.governance_hash {
        context = context.with_governance_hash(hash);
    }
    if let Some(digest) = &inputs.policy_digest {
        context = context.with_policy_digest(digest);
    }

    match codec.mint_at(context, flight_plan.completed_at) {
        Ok(token) => WalEntryData::ArtifactCreated(ArtifactCreated {
            artifact_id: format!("{}/{}", flight_plan.step_id, PLAN_TOKEN_ARTIFACT_TYPE),
            artifact_hash: token.token.clone(),
            artifact_type: PLAN_TOKEN_ARTIFACT_TYPE.to_string(),
            step_id: Some(flight_plan.step_id.clone()),
            plan_token: Some(token),
        }),
        Err(e) => failed(
            WorkflowFailed::new(FailureKind::MalformedArtifactSet, e.to_string())
                .with_step(&flight_plan.step_id),
        ),
    }
}

fn denied(workflow: &Workflow) -> WalEntryData {
    let batch = workflow.policy_evaluations.last();
    let message = match batch.and_then(|b| b.deciding_policy.as_deref()) {
        Some(policy) => format!("pre-flight denied by policy '{}'", policy),
        None => "pre-flight denied".to_string(),
    };
    let mut entry = WorkflowFailed::new(FailureKind::PolicyDenied, message);
    if let Some(batch) = batch {
        entry = entry.with_step(&batch.step_id);
    }
    failed(entry)
}

fn verify_integrity(workflow: &Workflow, codec: &PlanTokenCodec) -> WalEntryData {
    let (Some(token), Some(takeoff)) = (&workflow.plan_token, &workflow.takeoff) else {
        return failed(WorkflowFailed::new(
            FailureKind::IntegrityViolation,
            "no plan token or take-off record to verify",
        ));
    };

    if let Some(presented) = &takeoff.plan_token {
        if presented != &token.token {
            return failed(
                WorkflowFailed::new(
                    FailureKind::IntegrityViolation,
                    format!(
                        "take-off executed against plan token {}, expected {}",
                        presented, token.token
                    ),
                )
                .with_step(&takeoff.step_id),
            );
        }
    }

    let executed: Vec<PlanArtifactHash> =
        takeoff.artifacts.iter().map(PlanArtifactHash::from).collect();
    match codec.verify(token, &token.context().with_artifacts(executed.clone())) {
        Ok(true) => {
            let mut names: Vec<String> = executed.into_iter().map(|a| a.name).collect();
            names.sort();
            WalEntryData::WorkflowCompleted(WorkflowCompleted {
                final_state: WorkflowState::Completed,
                artifacts: names,
                plan_token_hash: Some(token.token.clone()),
            })
        }
        Ok(false) => {
            let mut details = diff_artifacts(&token.artifacts, &executed);
            if details.is_empty() {
                details.push("executed artifact set does not reproduce the plan token".into());
            }
            failed(
                WorkflowFailed::new(
                    FailureKind::IntegrityViolation,
                    "executed artifacts do not match the plan token",
                )
                .with_step(&takeoff.step_id)
                .with_details(details),
            )
        }
        Err(e @ PlanTokenError::UnsupportedTokenVersion { .. }) => failed(
            WorkflowFailed::new(FailureKind::UnsupportedTokenVersion, e.to_string())
                .with_step(&takeoff.step_id),
        ),
        Err(e) => failed(
            WorkflowFailed::new(FailureKind::IntegrityViolation, e.to_string())
                .with_step(&takeoff.step_id),
        ),
    }
}
