// governance_flow.rs — End-to-end tests for the governed workflow lifecycle.
//
// Each test drives an Orchestrator the way an engine runner would:
//   start → flight-plan → pre-flight → [approval] → take-off
// and then checks the workflow, the WAL, and the audit chain together.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use cc_audit::{
    verify_chain, verify_signatures, AuditEmitter, AuditSeverity, Ed25519Signer, JsonlAuditSink,
    MemoryAuditSink,
};
use cc_orchestrator::{
    ApprovalError, Orchestrator, OrchestratorConfig, OrchestratorError, StaticRoleDirectory,
    Workflow,
};
use cc_policy::{AggregationMethod, PolicyError, PolicyEvaluation, PolicySource};
use cc_protocol::{
    ApprovalResponse, Decision, EngineArtifact, EngineOutput, EngineStatus, FailureKind, Metadata,
    Mode, WorkflowState,
};
use cc_wal::{
    MemoryWalStorage, PlanInputs, PolicyEvaluated, RecordIter, StepCompleted, WalEntryData,
    WalEntryType, WalError, WalStorage, WriteAheadLog,
};

// ── Fixtures ──

struct Harness {
    storage: Arc<MemoryWalStorage>,
    sink: Arc<MemoryAuditSink>,
    orch: Orchestrator,
}

impl Harness {
    fn new() -> Self {
        let storage = Arc::new(MemoryWalStorage::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let orch = build(&storage, &sink);
        Self {
            storage,
            sink,
            orch,
        }
    }

    /// A second orchestrator over the same WAL and audit sink, as after a restart.
    fn restart(&self) -> Orchestrator {
        build(&self.storage, &self.sink)
    }
}

fn build(storage: &Arc<MemoryWalStorage>, sink: &Arc<MemoryAuditSink>) -> Orchestrator {
    Orchestrator::new(
        WriteAheadLog::new(storage.clone()),
        AuditEmitter::new(sink.clone()),
    )
    .with_identity(Arc::new(StaticRoleDirectory::new().with_role("alice", "sre")))
}

fn artifact(name: &str, hash: &str) -> EngineArtifact {
    EngineArtifact {
        name: name.into(),
        role: "plan".into(),
        path: format!("out/{}", name),
        hash: hash.into(),
        size: Some(128),
    }
}

fn plan_artifacts() -> Vec<EngineArtifact> {
    vec![artifact("main.tf", "h-main"), artifact("vars.tf", "h-vars")]
}

fn output(mode: Mode, artifacts: Vec<EngineArtifact>, plan_token: Option<String>) -> EngineOutput {
    EngineOutput {
        protocol_version: "1".into(),
        engine_id: "terraform".into(),
        mode,
        receipt_id: format!("receipt-{:?}", mode),
        status: EngineStatus::Success,
        error: None,
        warnings: vec![],
        artifacts,
        metrics: vec![],
        plan_token,
    }
}

fn eval(policy_id: &str, decision: Decision) -> PolicyEvaluation {
    PolicyEvaluation::new(policy_id, PolicySource::Opa, decision, Utc::now())
}

/// Drive a workflow to PRE_FLIGHT_RUNNING and return its plan-token hash.
fn to_preflight(orch: &Orchestrator, workflow_id: &str) -> String {
    orch.start_workflow(Some(workflow_id.into()), Metadata::new())
        .unwrap();
    orch.begin_flight_plan(workflow_id, "plan-1").unwrap();
    let wf = orch
        .submit_flight_plan(
            workflow_id,
            "plan-1",
            &output(Mode::FlightPlan, plan_artifacts(), None),
            PlanInputs::new("ws-hash", "model-x"),
        )
        .unwrap();
    assert_eq!(wf.state, WorkflowState::TokenCreated);
    let wf = orch.begin_preflight(workflow_id, "pre-1").unwrap();
    assert_eq!(wf.state, WorkflowState::PreFlightRunning);
    wf.plan_token_hash.unwrap()
}

/// Drive a workflow to AWAITING_APPROVAL and return its plan-token hash.
fn to_awaiting_approval(orch: &Orchestrator, workflow_id: &str) -> String {
    let token = to_preflight(orch, workflow_id);
    let (decision, wf) = orch
        .submit_policy_evaluations(
            workflow_id,
            "pre-1",
            vec![
                eval("opa.lint", Decision::Allow),
                eval("opa.prod-change", Decision::RequireApproval),
            ],
        )
        .unwrap();
    assert_eq!(decision.decision, Decision::RequireApproval);
    assert_eq!(wf.state, WorkflowState::AwaitingApproval);
    token
}

/// Start a flight plan and write its completion straight to the WAL, as if
/// the process died before minting the token or emitting the audit event.
fn interrupt_after_flight_plan(orch: &Orchestrator, workflow_id: &str) {
    orch.start_workflow(Some(workflow_id.into()), Metadata::new())
        .unwrap();
    orch.begin_flight_plan(workflow_id, "plan-1").unwrap();
    orch.wal()
        .append(
            workflow_id,
            WalEntryData::StepCompleted(StepCompleted {
                step_id: "plan-1".into(),
                step_type: cc_protocol::StepType::FlightPlan,
                engine_id: "terraform".into(),
                protocol_version: "1".into(),
                receipt_id: "r-1".into(),
                status: EngineStatus::Success,
                error: None,
                warnings: vec![],
                artifacts: plan_artifacts(),
                plan_token: None,
                plan_inputs: Some(PlanInputs::new("ws-hash", "model-x")),
            }),
        )
        .unwrap();
}

/// Memory storage whose appends fail for one workflow.
struct FailingAppends {
    inner: Arc<MemoryWalStorage>,
    workflow_id: &'static str,
}

impl WalStorage for FailingAppends {
    fn append(&self, workflow_id: &str, record: &[u8]) -> Result<(), WalError> {
        if workflow_id == self.workflow_id {
            return Err(WalError::Io {
                path: format!("{}.wal", workflow_id).into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.append(workflow_id, record)
    }

    fn records(&self, workflow_id: &str) -> Result<RecordIter, WalError> {
        self.inner.records(workflow_id)
    }

    fn workflows(&self) -> Result<Vec<String>, WalError> {
        self.inner.workflows()
    }
}

fn states(wf: &Workflow) -> Vec<WorkflowState> {
    wf.history.iter().map(|c| c.state).collect()
}

fn approve(request_id: &str, token: &str, approver: &str) -> ApprovalResponse {
    ApprovalResponse {
        approval_id: request_id.into(),
        approved: true,
        approver: approver.into(),
        plan_token_hash: token.into(),
        reason: None,
        timestamp: None,
    }
}

// ── Scenarios ──

#[test]
fn happy_path_reaches_completed() {
    let h = Harness::new();
    let token = to_preflight(&h.orch, "wf-1");

    let (decision, wf) = h
        .orch
        .submit_policy_evaluations("wf-1", "pre-1", vec![eval("opa.lint", Decision::Allow)])
        .unwrap();
    assert_eq!(decision.decision, Decision::Allow);
    assert_eq!(wf.state, WorkflowState::ReadyForTakeoff);

    h.orch.begin_takeoff("wf-1", "go-1").unwrap();
    let input = h
        .orch
        .takeoff_input("wf-1", "go-1", Metadata::new(), Metadata::new())
        .unwrap();
    assert_eq!(input.mode, Mode::TakeOff);
    assert_eq!(input.expected_plan_token.as_deref(), Some(token.as_str()));
    assert_eq!(input.orchestrator.workspace_hash.as_deref(), Some("ws-hash"));

    let wf = h
        .orch
        .submit_takeoff(
            "wf-1",
            "go-1",
            &output(Mode::TakeOff, plan_artifacts(), Some(token.clone())),
        )
        .unwrap();

    assert_eq!(wf.state, WorkflowState::Completed);
    assert_eq!(
        states(&wf),
        vec![
            WorkflowState::PlanRunning,
            WorkflowState::PlanGenerated,
            WorkflowState::TokenCreated,
            WorkflowState::PreFlightRunning,
            WorkflowState::PreflightComplete,
            WorkflowState::ReadyForTakeoff,
            WorkflowState::TakeoffRunning,
            WorkflowState::ExecutionComplete,
            WorkflowState::ArtifactsValidated,
            WorkflowState::Completed,
        ]
    );

    // One audit event per WAL entry, chained.
    let entries = h.orch.wal().read_all("wf-1").unwrap();
    let events = h.sink.events_for("wf-1");
    assert_eq!(entries.len(), 9);
    assert_eq!(events.len(), entries.len());
    verify_chain(&events).unwrap();
    assert_eq!(events.last().unwrap().event_type, "workflow_completed");
    assert!(events.last().unwrap().integrity_check.as_ref().unwrap().verified);
}

#[test]
fn require_approval_passes_through_approved() {
    let h = Harness::new();
    let token = to_awaiting_approval(&h.orch, "wf-1");

    let request = h
        .orch
        .request_approval("wf-1", "pre-1", "sre", "production change", vec![])
        .unwrap();
    assert_eq!(request.plan_token_hash, token);

    let wf = h
        .orch
        .submit_approval(&approve(&request.approval_id, &token, "alice"))
        .unwrap();
    assert_eq!(wf.state, WorkflowState::ReadyForTakeoff);
    assert_eq!(wf.approvals.len(), 1);
    assert!(wf.pending_approvals.is_empty());

    let history = states(&wf);
    let at = history
        .iter()
        .position(|s| *s == WorkflowState::AwaitingApproval)
        .unwrap();
    assert_eq!(
        &history[at..],
        &[
            WorkflowState::AwaitingApproval,
            WorkflowState::Approved,
            WorkflowState::ReadyForTakeoff,
        ]
    );
}

#[test]
fn deny_fails_immediately_after_the_policy_entry() {
    let h = Harness::new();
    to_preflight(&h.orch, "wf-1");

    let (decision, wf) = h
        .orch
        .submit_policy_evaluations(
            "wf-1",
            "pre-1",
            vec![eval("opa.lint", Decision::Allow), eval("opa.no-prod", Decision::Deny)],
        )
        .unwrap();
    assert_eq!(decision.decision, Decision::Deny);
    assert_eq!(decision.deciding_policy.as_deref(), Some("opa.no-prod"));
    assert_eq!(wf.state, WorkflowState::Failed);
    assert_eq!(wf.failure.as_ref().unwrap().kind, FailureKind::PolicyDenied);

    let entries = h.orch.wal().read_all("wf-1").unwrap();
    let [.., evaluated, failed] = entries.as_slice() else {
        panic!("expected at least two entries");
    };
    assert_eq!(evaluated.entry_type(), WalEntryType::PolicyEvaluated);
    assert_eq!(failed.entry_type(), WalEntryType::WorkflowFailed);
    assert_eq!(failed.sequence, evaluated.sequence + 1);

    // Every evaluation is recorded, not only the deciding one.
    match &evaluated.data {
        WalEntryData::PolicyEvaluated(batch) => assert_eq!(batch.evaluations.len(), 2),
        other => panic!("unexpected entry {:?}", other),
    }
    let last = h.sink.events_for("wf-1").pop().unwrap();
    assert_eq!(last.severity, AuditSeverity::Error);
}

#[test]
fn approval_for_another_token_is_rejected_as_replay() {
    let h = Harness::new();
    let token = to_awaiting_approval(&h.orch, "wf-1");
    let request = h
        .orch
        .request_approval("wf-1", "pre-1", "sre", "production change", vec![])
        .unwrap();

    let forged = approve(&request.approval_id, "0000-not-the-plan", "alice");
    let err = h.orch.submit_approval(&forged).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Approval(ApprovalError::ReplayRejected { .. })
    ));
    assert_eq!(err.failure_kind(), Some(FailureKind::ReplayRejected));

    let wf = h.orch.snapshot("wf-1").unwrap();
    assert_eq!(wf.state, WorkflowState::Failed);
    assert_eq!(wf.failure.as_ref().unwrap().kind, FailureKind::ReplayRejected);
    assert!(!states(&wf).contains(&WorkflowState::Approved));

    // The genuine approval cannot revive it.
    assert!(h
        .orch
        .submit_approval(&approve(&request.approval_id, &token, "alice"))
        .is_err());
    let events = h.sink.events_for("wf-1");
    assert_eq!(events.last().unwrap().severity, AuditSeverity::Critical);
}

#[test]
fn approver_without_role_changes_nothing() {
    let h = Harness::new();
    let token = to_awaiting_approval(&h.orch, "wf-1");
    let request = h
        .orch
        .request_approval("wf-1", "pre-1", "sre", "production change", vec![])
        .unwrap();
    let before = h.orch.wal().last_sequence("wf-1").unwrap();

    let err = h
        .orch
        .submit_approval(&approve(&request.approval_id, &token, "mallory"))
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Approval(ApprovalError::RoleNotSatisfied { .. })
    ));
    assert_eq!(h.orch.wal().last_sequence("wf-1").unwrap(), before);
    assert_eq!(
        h.orch.snapshot("wf-1").unwrap().state,
        WorkflowState::AwaitingApproval
    );
}

#[test]
fn rejected_approval_fails_the_workflow() {
    let h = Harness::new();
    let token = to_awaiting_approval(&h.orch, "wf-1");
    let request = h
        .orch
        .request_approval("wf-1", "pre-1", "sre", "production change", vec![])
        .unwrap();

    let mut response = approve(&request.approval_id, &token, "alice");
    response.approved = false;
    response.reason = Some("not during the freeze".into());
    let wf = h.orch.submit_approval(&response).unwrap();
    assert_eq!(wf.state, WorkflowState::Failed);
    let failure = wf.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ApprovalDenied);
    assert_eq!(failure.details, vec!["not during the freeze"]);
}

#[test]
fn empty_policy_batch_writes_nothing() {
    let h = Harness::new();
    to_preflight(&h.orch, "wf-1");
    let before = h.orch.wal().last_sequence("wf-1").unwrap();

    let err = h
        .orch
        .submit_policy_evaluations("wf-1", "pre-1", vec![])
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Policy(PolicyError::NoEvaluations)
    ));
    assert_eq!(h.orch.wal().last_sequence("wf-1").unwrap(), before);
    assert_eq!(
        h.orch.snapshot("wf-1").unwrap().state,
        WorkflowState::PreFlightRunning
    );
}

#[test]
fn changed_execution_is_an_integrity_violation() {
    let h = Harness::new();
    let token = to_preflight(&h.orch, "wf-1");
    h.orch
        .submit_policy_evaluations("wf-1", "pre-1", vec![eval("opa.lint", Decision::Warn)])
        .unwrap();
    h.orch.begin_takeoff("wf-1", "go-1").unwrap();

    let executed = vec![artifact("main.tf", "h-main"), artifact("vars.tf", "h-tampered")];
    let wf = h
        .orch
        .submit_takeoff("wf-1", "go-1", &output(Mode::TakeOff, executed, Some(token)))
        .unwrap();

    assert_eq!(wf.state, WorkflowState::Failed);
    let failure = wf.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::IntegrityViolation);
    assert_eq!(
        failure.details,
        vec!["artifact 'vars.tf' hash changed: h-vars -> h-tampered"]
    );

    let last = h.sink.events_for("wf-1").pop().unwrap();
    assert_eq!(last.severity, AuditSeverity::Critical);
    assert!(!last.integrity_check.unwrap().verified);
}

#[test]
fn engine_failure_fails_the_workflow() {
    let h = Harness::new();
    h.orch
        .start_workflow(Some("wf-1".into()), Metadata::new())
        .unwrap();
    h.orch.begin_flight_plan("wf-1", "plan-1").unwrap();
    let mut failed = output(Mode::FlightPlan, vec![], None);
    failed.status = EngineStatus::Failure;
    failed.error = Some("provider timeout".into());

    let wf = h
        .orch
        .submit_flight_plan("wf-1", "plan-1", &failed, PlanInputs::new("ws", "m"))
        .unwrap();
    assert_eq!(wf.state, WorkflowState::Failed);
    assert_eq!(wf.failure.as_ref().unwrap().kind, FailureKind::EngineFailure);
    assert!(wf.plan_token_hash.is_none());
}

#[test]
fn cancelled_workflow_is_terminal() {
    let h = Harness::new();
    h.orch
        .start_workflow(Some("wf-1".into()), Metadata::new())
        .unwrap();
    let wf = h.orch.cancel("wf-1", "operator request").unwrap();
    assert_eq!(wf.state, WorkflowState::Failed);
    assert_eq!(wf.failure.unwrap().kind, FailureKind::Cancelled);

    assert!(matches!(
        h.orch.begin_flight_plan("wf-1", "plan-1"),
        Err(OrchestratorError::Terminal { .. })
    ));
}

// ── Recovery ──

#[test]
fn replay_is_deterministic() {
    let h = Harness::new();
    to_awaiting_approval(&h.orch, "wf-1");
    let live = h.orch.snapshot("wf-1").unwrap();

    let first = Workflow::replay("wf-1", h.orch.wal().replay("wf-1").unwrap()).unwrap();
    let second = Workflow::replay("wf-1", h.orch.wal().replay("wf-1").unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, live);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn audit_chain_is_rebuilt_identically_from_the_wal() {
    let project = TempDir::new().unwrap();
    let config = OrchestratorConfig::for_project(project.path());
    let orch = Orchestrator::open(&config).unwrap();
    to_awaiting_approval(&orch, "wf-1");
    drop(orch);

    let mut rebuilt = config.clone();
    rebuilt.audit.log = project.path().join("rebuilt-audit.jsonl");
    let orch = Orchestrator::open(&rebuilt).unwrap();
    let report = orch.recover().unwrap();
    assert_eq!(report.recovered, vec!["wf-1".to_string()]);

    let original = JsonlAuditSink::read_all(&config.audit.log).unwrap();
    let replayed = JsonlAuditSink::read_all(&rebuilt.audit.log).unwrap();
    assert_eq!(report.audit_reemitted, original.len());
    assert_eq!(
        original.iter().map(|e| &e.chain_hash).collect::<Vec<_>>(),
        replayed.iter().map(|e| &e.chain_hash).collect::<Vec<_>>()
    );
}

#[test]
fn torn_audit_write_is_refilled_from_the_wal_on_restart() {
    let project = TempDir::new().unwrap();
    let config = OrchestratorConfig::for_project(project.path());
    let orch = Orchestrator::open(&config).unwrap();
    to_awaiting_approval(&orch, "wf-1");
    drop(orch);

    let original = JsonlAuditSink::read_all(&config.audit.log).unwrap();
    let content = std::fs::read_to_string(&config.audit.log).unwrap();
    let mut lines: Vec<&str> = content.lines().collect();
    let last = lines.pop().unwrap();
    let mut torn = lines.join("\n");
    torn.push('\n');
    torn.push_str(&last[..last.len() / 2]);
    std::fs::write(&config.audit.log, torn).unwrap();

    let orch = Orchestrator::open(&config).unwrap();
    let report = orch.recover().unwrap();
    assert_eq!(report.recovered, vec!["wf-1".to_string()]);
    assert_eq!(report.audit_reemitted, 1);

    let repaired = JsonlAuditSink::read_all(&config.audit.log).unwrap();
    verify_chain(&repaired).unwrap();
    assert_eq!(
        original.iter().map(|e| &e.chain_hash).collect::<Vec<_>>(),
        repaired.iter().map(|e| &e.chain_hash).collect::<Vec<_>>()
    );
}

#[test]
fn recovery_finishes_interrupted_transitions_and_audit() {
    let h = Harness::new();
    interrupt_after_flight_plan(&h.orch, "wf-1");
    assert_eq!(h.sink.events_for("wf-1").len(), 2);

    let orch = h.restart();
    let report = orch.recover().unwrap();
    assert_eq!(report.recovered, vec!["wf-1".to_string()]);
    assert!(report.quarantined.is_empty());
    assert_eq!(report.audit_reemitted, 1);

    let wf = orch.snapshot("wf-1").unwrap();
    assert_eq!(wf.state, WorkflowState::TokenCreated);
    assert!(wf.plan_token_hash.is_some());

    let events = h.sink.events_for("wf-1");
    assert_eq!(events.len(), 4);
    verify_chain(&events).unwrap();

    // A second recovery finds nothing left to do.
    let again = h.restart().recover().unwrap();
    assert_eq!(again.audit_reemitted, 0);
    assert_eq!(orch.wal().last_sequence("wf-1").unwrap(), 4);
}

#[test]
fn a_workflow_that_cannot_resume_does_not_stop_recovery() {
    let h = Harness::new();
    interrupt_after_flight_plan(&h.orch, "wf-a");
    interrupt_after_flight_plan(&h.orch, "wf-b");

    let failing = Arc::new(FailingAppends {
        inner: h.storage.clone(),
        workflow_id: "wf-a",
    });
    let orch = Orchestrator::new(
        WriteAheadLog::new(failing),
        AuditEmitter::new(h.sink.clone()),
    );
    let report = orch.recover().unwrap();

    assert_eq!(report.recovered, vec!["wf-b".to_string()]);
    assert!(report.quarantined.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].workflow_id, "wf-a");
    assert!(report.failed[0].error.contains("disk full"));
    assert_eq!(
        orch.snapshot("wf-b").unwrap().state,
        WorkflowState::TokenCreated
    );

    // Not quarantined: once appends work again the workflow resumes.
    let report = h.restart().recover().unwrap();
    assert_eq!(report.recovered.len(), 2);
    assert!(report.failed.is_empty());
}

#[test]
fn approval_reaches_a_workflow_not_yet_loaded() {
    let h = Harness::new();
    let token = to_awaiting_approval(&h.orch, "wf-1");
    let request = h
        .orch
        .request_approval("wf-1", "pre-1", "sre", "production change", vec![])
        .unwrap();

    // No recover(): the approval index starts empty.
    let orch = h.restart();
    let wf = orch
        .submit_approval(&approve(&request.approval_id, &token, "alice"))
        .unwrap();
    assert_eq!(wf.state, WorkflowState::ReadyForTakeoff);

    assert!(matches!(
        orch.submit_approval(&approve("appr-unknown", &token, "alice")),
        Err(OrchestratorError::Approval(ApprovalError::UnknownApproval(_)))
    ));
}

#[test]
fn evicted_terminal_workflows_stay_listed_and_readable() {
    let h = Harness::new();
    let orch = h.restart().with_terminal_retention(1);
    for id in ["wf-1", "wf-2", "wf-3"] {
        orch.start_workflow(Some(id.into()), Metadata::new()).unwrap();
        orch.cancel(id, "stop").unwrap();
    }
    orch.start_workflow(Some("wf-4".into()), Metadata::new())
        .unwrap();

    let listed: Vec<(String, WorkflowState)> = orch
        .list()
        .into_iter()
        .map(|s| (s.workflow_id, s.state))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("wf-1".to_string(), WorkflowState::Failed),
            ("wf-2".to_string(), WorkflowState::Failed),
            ("wf-3".to_string(), WorkflowState::Failed),
            ("wf-4".to_string(), WorkflowState::PlanRunning),
        ]
    );

    let wf = orch.snapshot("wf-1").unwrap();
    assert_eq!(wf.state, WorkflowState::Failed);
    assert_eq!(wf.failure.unwrap().kind, FailureKind::Cancelled);
    assert!(matches!(
        orch.start_workflow(Some("wf-2".into()), Metadata::new()),
        Err(OrchestratorError::AlreadyExists(_))
    ));

    // Reloading an evicted workflow emits nothing new.
    assert_eq!(h.sink.events_for("wf-1").len(), 2);
    assert!(orch.recover().unwrap().terminal.is_empty());
}

#[test]
fn tampered_wal_quarantines_the_workflow() {
    let h = Harness::new();
    for id in ["wf-tampered", "wf-duplicated", "wf-clean"] {
        h.orch.start_workflow(Some(id.into()), Metadata::new()).unwrap();
        h.orch.begin_flight_plan(id, "plan-1").unwrap();
    }

    let mut record: serde_json::Value =
        serde_json::from_slice(&h.storage.snapshot("wf-tampered")[1]).unwrap();
    record["data"]["step_id"] = serde_json::json!("plan-evil");
    assert!(h
        .storage
        .overwrite("wf-tampered", 1, serde_json::to_vec(&record).unwrap()));

    let first = h.storage.snapshot("wf-duplicated")[0].clone();
    assert!(h.storage.overwrite("wf-duplicated", 1, first));

    let orch = h.restart();
    let report = orch.recover().unwrap();
    assert_eq!(report.recovered, vec!["wf-clean".to_string()]);
    let kinds: Vec<(String, FailureKind)> = report
        .quarantined
        .iter()
        .map(|q| (q.workflow_id.clone(), q.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("wf-duplicated".to_string(), FailureKind::SequenceGap),
            ("wf-tampered".to_string(), FailureKind::ChecksumMismatch),
        ]
    );

    assert!(matches!(
        orch.snapshot("wf-tampered"),
        Err(OrchestratorError::Quarantined { .. })
    ));
    assert!(matches!(
        orch.cancel("wf-duplicated", "cleanup"),
        Err(OrchestratorError::Quarantined { .. })
    ));
    assert_eq!(orch.quarantined().len(), 2);
    assert_eq!(orch.list().len(), 1);
}

#[test]
fn signed_audit_chain_verifies_with_the_public_key() {
    let project = TempDir::new().unwrap();
    let pkcs8 = Ed25519Signer::generate_pkcs8().unwrap();
    let key_path = project.path().join("audit.pk8");
    std::fs::write(&key_path, &pkcs8).unwrap();

    let mut config = OrchestratorConfig::for_project(project.path());
    config.audit.signing_key_ref = Some("ops-2026".into());
    config.audit.signing_key_path = Some(key_path);
    let orch = Orchestrator::open(&config).unwrap();
    to_preflight(&orch, "wf-1");

    let events = JsonlAuditSink::read_all(&config.audit.log).unwrap();
    assert!(events
        .iter()
        .all(|e| e.signature_key_ref.as_deref() == Some("ops-2026")));
    let keys = Ed25519Signer::from_pkcs8("ops-2026", &pkcs8).unwrap();
    assert_eq!(verify_signatures(&events, &keys).unwrap(), events.len());
}

#[test]
fn forged_policy_decision_in_the_wal_is_quarantined() {
    let h = Harness::new();
    to_preflight(&h.orch, "wf-1");

    // Checksums are unkeyed, so a writer with WAL access can seal any entry.
    h.orch
        .wal()
        .append(
            "wf-1",
            WalEntryData::PolicyEvaluated(PolicyEvaluated {
                evaluation_id: "ev-forged".into(),
                step_id: "pre-1".into(),
                aggregation_method: AggregationMethod::MostRestrictive,
                decision: Decision::Allow,
                deciding_policy: Some("opa.prod-change".into()),
                evaluations: vec![eval("opa.prod-change", Decision::Deny)],
            }),
        )
        .unwrap();

    let orch = h.restart();
    let report = orch.recover().unwrap();
    assert!(report.recovered.is_empty());
    assert_eq!(report.quarantined.len(), 1);
    assert_eq!(report.quarantined[0].workflow_id, "wf-1");
    assert_eq!(report.quarantined[0].kind, FailureKind::IntegrityViolation);
    assert!(matches!(
        orch.snapshot("wf-1"),
        Err(OrchestratorError::Quarantined { .. })
    ));
}
