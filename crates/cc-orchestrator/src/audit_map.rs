// audit_map.rs — Build the audit event that mirrors a WAL entry.
//
// The event reads only the entry and the workflow as it stood right after the
// entry was applied, so the same log always yields the same events.

use cc_audit::{
    ApprovalSection, ArtifactRef, AuditEvent, AuditSeverity, EngineSection, GatewaySection,
    IntegritySection, PlanTokenSection, PolicySection, WorkflowSection,
};
use cc_policy::{GatewayKind, PolicyEvaluation, PolicySource};
use cc_protocol::{Decision, EngineStatus, FailureKind};
use cc_wal::{WalEntry, WalEntryData};

use crate::workflow::Workflow;

pub fn audit_event(entry: &WalEntry, after: &Workflow) -> AuditEvent {
    let event = AuditEvent::new(
        &entry.workflow_id,
        entry.sequence,
        entry.entry_type().as_str(),
        entry.timestamp,
        after.state,
    );

    match &entry.data {
        WalEntryData::WorkflowStarted(_) => event.with_message("workflow started"),

        WalEntryData::StepStarted(step) => event
            .with_message(format!("{} step '{}' started", step.step_type, step.step_id))
            .with_workflow(WorkflowSection {
                step_id: Some(step.step_id.clone()),
                step_type: Some(step.step_type),
                failure: None,
            }),

        WalEntryData::StepCompleted(done) => {
            let failed = done.status == EngineStatus::Failure;
            let severity = if failed {
                AuditSeverity::Error
            } else {
                AuditSeverity::Info
            };
            let mut event = event
                .with_severity(severity)
                .with_message(format!(
                    "{} step '{}' completed: {}",
                    done.step_type,
                    done.step_id,
                    if failed { "failure" } else { "success" }
                ))
                .with_workflow(WorkflowSection {
                    step_id: Some(done.step_id.clone()),
                    step_type: Some(done.step_type),
                    failure: failed.then_some(FailureKind::EngineFailure),
                })
                .with_engine(EngineSection {
                    engine_id: done.engine_id.clone(),
                    receipt_id: done.receipt_id.clone(),
                    status: done.status,
                    error: done.error.clone(),
                })
                .with_artifacts(
                    done.artifacts
                        .iter()
                        .map(|a| ArtifactRef {
                            name: a.name.clone(),
                            hash: a.hash.clone(),
                            kind: Some(a.role.clone()),
                        })
                        .collect(),
                );
            if let Some(token) = &done.plan_token {
                event = event.with_plan_token(PlanTokenSection {
                    token_hash: token.clone(),
                    version: None,
                });
            }
            event
        }

        WalEntryData::PolicyEvaluated(batch) => {
            let severity = match batch.decision {
                Decision::Allow => AuditSeverity::Info,
                Decision::Warn | Decision::RequireApproval => AuditSeverity::Warning,
                Decision::Deny => AuditSeverity::Error,
            };
            event
                .with_severity(severity)
                .with_message(format!(
                    "pre-flight '{}' aggregated to {} ({})",
                    batch.step_id, batch.decision, batch.aggregation_method
                ))
                .with_policy(PolicySection {
                    evaluation_id: Some(batch.evaluation_id.clone()),
                    aggregation_method: batch.aggregation_method,
                    decision: batch.decision,
                    deciding_policy: batch.deciding_policy.clone(),
                    policy_evaluations: batch.evaluations.clone(),
                })
                .with_gateway(gateway_sections(&batch.evaluations))
        }

        WalEntryData::ApprovalRequested(request) => event
            .with_message(format!(
                "approval '{}' requested for role '{}'",
                request.approval_id, request.required_role
            ))
            .with_approval(ApprovalSection {
                approval_id: request.approval_id.clone(),
                plan_token_hash: request.plan_token_hash.clone(),
                required_role: Some(request.required_role.clone()),
                approved: None,
                approver: None,
            }),

        WalEntryData::ApprovalReceived(record) => {
            let severity = if record.approved {
                AuditSeverity::Info
            } else {
                AuditSeverity::Warning
            };
            event
                .with_severity(severity)
                .with_message(format!(
                    "approval '{}' {} by {}",
                    record.approval_id,
                    if record.approved { "granted" } else { "rejected" },
                    record.approver
                ))
                .with_approval(ApprovalSection {
                    approval_id: record.approval_id.clone(),
                    plan_token_hash: record.plan_token_hash.clone(),
                    required_role: None,
                    approved: Some(record.approved),
                    approver: Some(record.approver.clone()),
                })
        }

        WalEntryData::ArtifactCreated(artifact) => {
            let mut event = event
                .with_message(format!("artifact '{}' created", artifact.artifact_id))
                .with_artifacts(vec![ArtifactRef {
                    name: artifact.artifact_id.clone(),
                    hash: artifact.artifact_hash.clone(),
                    kind: Some(artifact.artifact_type.clone()),
                }]);
            if let Some(token) = &artifact.plan_token {
                event = event.with_plan_token(PlanTokenSection {
                    token_hash: token.token.clone(),
                    version: Some(token.version.clone()),
                });
            }
            event
        }

        WalEntryData::WorkflowCompleted(done) => {
            let mut event = event
                .with_message("executed artifacts verified against the plan token")
                .with_integrity(IntegritySection {
                    verified: true,
                    plan_token_hash: done.plan_token_hash.clone(),
                    details: Vec::new(),
                });
            if let Some(token) = &done.plan_token_hash {
                event = event.with_plan_token(PlanTokenSection {
                    token_hash: token.clone(),
                    version: after.plan_token.as_ref().map(|t| t.version.clone()),
                });
            }
            event
        }

        WalEntryData::WorkflowFailed(failed) => {
            let severity = match failed.error {
                FailureKind::IntegrityViolation
                | FailureKind::ReplayRejected
                | FailureKind::ChecksumMismatch
                | FailureKind::SequenceGap
                | FailureKind::UnsupportedTokenVersion => AuditSeverity::Critical,
                FailureKind::Cancelled => AuditSeverity::Warning,
                _ => AuditSeverity::Error,
            };
            let mut event = event
                .with_severity(severity)
                .with_message(format!("workflow failed ({}): {}", failed.error, failed.message))
                .with_workflow(WorkflowSection {
                    step_id: failed.failed_step.clone(),
                    step_type: None,
                    failure: Some(failed.error),
                });
            if matches!(
                failed.error,
                FailureKind::IntegrityViolation | FailureKind::UnsupportedTokenVersion
            ) {
                event = event.with_integrity(IntegritySection {
                    verified: false,
                    plan_token_hash: after.plan_token_hash.clone(),
                    details: failed.details.clone(),
                });
            }
            event
        }
    }
}

fn gateway_sections(evaluations: &[PolicyEvaluation]) -> Vec<GatewaySection> {
    [
        (PolicySource::LlmGateway, GatewayKind::Llm),
        (PolicySource::McpGateway, GatewayKind::Mcp),
    ]
    .into_iter()
    .filter_map(|(source, gateway)| {
        let policy_ids: Vec<String> = evaluations
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.policy_id.clone())
            .collect();
        (!policy_ids.is_empty()).then_some(GatewaySection {
            gateway,
            policy_ids,
        })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_policy::AggregationMethod;
    use cc_protocol::WorkflowState;
    use cc_wal::{PolicyEvaluated, WorkflowFailed, WorkflowStarted};
    use chrono::{TimeZone, Utc};

    fn entry(seq: u64, data: WalEntryData) -> WalEntry {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        WalEntry::seal("wf-1", seq, data, ts).unwrap()
    }

    #[test]
    fn event_identity_comes_from_the_entry() {
        let e = entry(
            1,
            WalEntryData::WorkflowStarted(WorkflowStarted::new(WorkflowState::Init)),
        );
        let mut wf = Workflow::new("wf-1");
        wf.state = WorkflowState::PlanRunning;
        let event = audit_event(&e, &wf);
        assert_eq!(event.event_id, "wf-1-00000001");
        assert_eq!(event.event_type, "workflow_started");
        assert_eq!(event.timestamp, e.timestamp);
        assert_eq!(event.workflow_state, WorkflowState::PlanRunning);
    }

    #[test]
    fn policy_batch_carries_every_evaluation_and_gateways() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let evaluations = vec![
            PolicyEvaluation::new("opa.prod", PolicySource::Opa, Decision::Allow, ts),
            PolicyEvaluation::new("llm.pii", PolicySource::LlmGateway, Decision::Warn, ts),
        ];
        let e = entry(
            7,
            WalEntryData::PolicyEvaluated(PolicyEvaluated {
                evaluation_id: "ev-1".into(),
                step_id: "pre-1".into(),
                aggregation_method: AggregationMethod::MostRestrictive,
                decision: Decision::Warn,
                deciding_policy: Some("llm.pii".into()),
                evaluations,
            }),
        );
        let event = audit_event(&e, &Workflow::new("wf-1"));
        assert_eq!(event.severity, AuditSeverity::Warning);
        assert_eq!(event.policy.as_ref().unwrap().policy_evaluations.len(), 2);
        assert_eq!(event.gateway.len(), 1);
        assert_eq!(event.gateway[0].gateway, GatewayKind::Llm);
        assert_eq!(event.gateway[0].policy_ids, vec!["llm.pii"]);
    }

    #[test]
    fn integrity_failures_are_critical_and_itemized() {
        let e = entry(
            12,
            WalEntryData::WorkflowFailed(
                WorkflowFailed::new(FailureKind::IntegrityViolation, "mismatch")
                    .with_details(vec!["missing artifact 'b'".into()]),
            ),
        );
        let event = audit_event(&e, &Workflow::new("wf-1"));
        assert_eq!(event.severity, AuditSeverity::Critical);
        let integrity = event.integrity_check.unwrap();
        assert!(!integrity.verified);
        assert_eq!(integrity.details, vec!["missing artifact 'b'"]);
    }
}
