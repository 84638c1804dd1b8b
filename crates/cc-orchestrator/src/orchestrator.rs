// orchestrator.rs — The governance orchestrator.
//
// Every state change follows the same path:
//   1. the workflow's guard validates the entry (nothing written on failure)
//   2. the entry is appended to the WAL and made durable
//   3. the entry is applied to the in-memory workflow
//   4. the matching audit event is chained and emitted
//   5. automatic follow-up entries (token minting, deny/failure handling,
//      integrity verification) are committed the same way until none is owed
//
// The WAL is the source of truth. Audit emission that fails is logged and
// caught up from the WAL on the next commit or on recovery. A workflow whose
// WAL fails integrity checks is quarantined: it is never advanced again by
// this process and every mutating call on it returns `Quarantined`.
//
// Locking: a workflow lock may be held while taking the registry lock, never
// the reverse, and at most one workflow lock is held at a time.
//
// Terminal workflows beyond the retention bound are evicted to a summary.
// They stay readable: any access reloads them from the WAL.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cc_audit::{AuditEmitter, ChainSigner, Ed25519Signer, JsonlAuditSink};
use cc_plantoken::PlanTokenCodec;
use cc_policy::{AggregatedDecision, PolicyAggregator, PolicyEvaluation};
use cc_protocol::{
    ApprovalRequest, ApprovalResponse, EngineInput, EngineMeta, EngineOrchestrator, EngineOutput,
    FailureKind, Metadata, Mode, PreflightEvidence, StepType, WorkflowState, PROTOCOL_VERSION,
};
use cc_wal::{
    ArtifactCreated, FileWalStorage, PlanInputs, PolicyEvaluated, StepCompleted, StepStarted,
    WalEntry, WalEntryData, WorkflowFailed, WorkflowStarted, WriteAheadLog,
    PLAN_TOKEN_ARTIFACT_TYPE,
};

use crate::approval::{ApprovalBinder, IdentityProvider, StaticRoleDirectory};
use crate::audit_map::audit_event;
use crate::config::{OrchestratorConfig, DEFAULT_RETAIN_TERMINAL};
use crate::error::{ApprovalError, OrchestratorError};
use crate::followup::next_entry;
use crate::workflow::Workflow;

/// A workflow this process refuses to advance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuarantineRecord {
    pub workflow_id: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// One line of `list()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub last_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.workflow_id.clone(),
            state: workflow.state,
            last_sequence: workflow.last_sequence,
            plan_token_hash: workflow.plan_token_hash.clone(),
            updated_at: workflow.updated_at,
        }
    }
}

/// What `recover()` found and did.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal workflows restored and resumed.
    pub recovered: Vec<String>,
    /// Workflows already COMPLETED or FAILED.
    pub terminal: Vec<String>,
    pub quarantined: Vec<QuarantineRecord>,
    /// Workflows that could not be resumed. They are left unloaded and are
    /// retried on next access.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RecoveryFailure>,
    /// Audit events rebuilt from the WAL because the sink was behind it.
    pub audit_reemitted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryFailure {
    pub workflow_id: String,
    pub error: String,
}

type Slot = Arc<Mutex<Workflow>>;

pub struct Orchestrator {
    wal: WriteAheadLog,
    audit: AuditEmitter,
    aggregator: PolicyAggregator,
    codec: PlanTokenCodec,
    binder: ApprovalBinder,
    workflows: RwLock<HashMap<String, Slot>>,
    /// approval_id → workflow_id
    approvals: RwLock<HashMap<String, String>>,
    quarantine: RwLock<BTreeMap<String, QuarantineRecord>>,
    /// Loaded terminal workflows, oldest first.
    terminal: Mutex<VecDeque<WorkflowSummary>>,
    /// Evicted terminal workflows.
    retired: RwLock<BTreeMap<String, WorkflowSummary>>,
    retain_terminal: usize,
    /// Serializes loading workflows from the WAL.
    loading: Mutex<()>,
}

impl Orchestrator {
    pub fn new(wal: WriteAheadLog, audit: AuditEmitter) -> Self {
        Self {
            wal,
            audit,
            aggregator: PolicyAggregator::new(Default::default()),
            codec: PlanTokenCodec::new(),
            binder: ApprovalBinder::new(Arc::new(StaticRoleDirectory::new())),
            workflows: RwLock::new(HashMap::new()),
            approvals: RwLock::new(HashMap::new()),
            quarantine: RwLock::new(BTreeMap::new()),
            terminal: Mutex::new(VecDeque::new()),
            retired: RwLock::new(BTreeMap::new()),
            retain_terminal: DEFAULT_RETAIN_TERMINAL,
            loading: Mutex::new(()),
        }
    }

    pub fn with_aggregator(mut self, aggregator: PolicyAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.binder = ApprovalBinder::new(identity);
        self
    }

    /// Number of COMPLETED/FAILED workflows kept loaded.
    pub fn with_terminal_retention(mut self, retain: usize) -> Self {
        self.retain_terminal = retain;
        self
    }

    /// Build a file-backed orchestrator from config. Call [`recover`] before
    /// serving requests.
    ///
    /// [`recover`]: Orchestrator::recover
    pub fn open(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let storage = FileWalStorage::open(&config.wal.dir)?.with_sync(config.wal.sync);
        let sink = JsonlAuditSink::open(&config.audit.log)?;

        let mut audit = AuditEmitter::new(Arc::new(sink));
        if let Some(path) = &config.audit.signing_key_path {
            audit = audit.with_signer(load_signer(config, path)?);
        }

        tracing::info!(
            wal_dir = %config.wal.dir.display(),
            audit_log = %config.audit.log.display(),
            aggregation_method = %config.aggregation_method,
            signed = config.audit.signing_key_path.is_some(),
            "orchestrator opened"
        );

        Ok(Self::new(WriteAheadLog::new(Arc::new(storage)), audit)
            .with_aggregator(PolicyAggregator::new(config.aggregation_method))
            .with_identity(Arc::new(StaticRoleDirectory::from_map(
                &config.approvals.roles,
            )))
            .with_terminal_retention(config.retain_terminal))
    }

    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    pub fn audit(&self) -> &AuditEmitter {
        &self.audit
    }

    pub fn codec(&self) -> &PlanTokenCodec {
        &self.codec
    }

    // ── Lifecycle operations ──

    /// Create a workflow and commit its `workflow_started` entry.
    ///
    /// A fresh UUID is assigned when `workflow_id` is None.
    pub fn start_workflow(
        &self,
        workflow_id: Option<String>,
        metadata: Metadata,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow_id = workflow_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let slot: Slot = Arc::new(Mutex::new(Workflow::new(&workflow_id)));
        let mut workflow = slot.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let mut registry = self.workflows.write().unwrap_or_else(PoisonError::into_inner);
            if registry.contains_key(&workflow_id)
                || self.quarantine_record(&workflow_id).is_some()
                || self.wal.last_sequence(&workflow_id)? > 0
            {
                return Err(OrchestratorError::AlreadyExists(workflow_id));
            }
            registry.insert(workflow_id.clone(), slot.clone());
        }

        let started = WorkflowStarted::new(WorkflowState::Init).with_metadata(metadata);
        if let Err(e) = self.commit(&mut workflow, WalEntryData::WorkflowStarted(started)) {
            if workflow.last_sequence == 0 {
                self.workflows
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&workflow_id);
            }
            return Err(e);
        }

        tracing::info!(workflow_id = %workflow_id, "workflow started");
        Ok(workflow.clone())
    }

    pub fn begin_flight_plan(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Workflow, OrchestratorError> {
        self.begin_step(workflow_id, step_id, StepType::FlightPlan)
    }

    /// Engine input for a flight-plan run.
    pub fn flight_plan_input(
        &self,
        workflow_id: &str,
        step_id: &str,
        config: Metadata,
        context: Metadata,
    ) -> Result<EngineInput, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| {
            self.expect_pending(workflow, step_id, StepType::FlightPlan)?;
            Ok(EngineInput {
                protocol_version: PROTOCOL_VERSION.to_string(),
                mode: Mode::FlightPlan,
                meta: EngineMeta {
                    workflow_id: workflow.workflow_id.clone(),
                    step_id: step_id.to_string(),
                },
                config,
                context,
                orchestrator: EngineOrchestrator::default(),
                expected_plan_token: None,
            })
        })
    }

    /// Record a flight-plan engine's output. On success the plan token is
    /// minted and the workflow moves to TOKEN_CREATED; on failure it moves
    /// to FAILED.
    pub fn submit_flight_plan(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: &EngineOutput,
        inputs: PlanInputs,
    ) -> Result<Workflow, OrchestratorError> {
        expect_mode(output, Mode::FlightPlan)?;
        let completed = step_completed(step_id, StepType::FlightPlan, output, Some(inputs));
        self.with_workflow(workflow_id, |workflow| {
            self.commit(workflow, WalEntryData::StepCompleted(completed))?;
            self.settle(workflow)?;
            Ok(workflow.clone())
        })
    }

    pub fn begin_preflight(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Workflow, OrchestratorError> {
        self.begin_step(workflow_id, step_id, StepType::PreFlight)
    }

    /// Aggregate a pre-flight batch and commit it with every evaluation.
    ///
    /// An empty or invalid batch is refused before anything is written.
    pub fn submit_policy_evaluations(
        &self,
        workflow_id: &str,
        step_id: &str,
        evaluations: Vec<PolicyEvaluation>,
    ) -> Result<(AggregatedDecision, Workflow), OrchestratorError> {
        let slot = self.slot(workflow_id)?;
        let aggregated = self.aggregator.aggregate(evaluations)?;

        let mut workflow = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = PolicyEvaluated {
            evaluation_id: Uuid::new_v4().to_string(),
            step_id: step_id.to_string(),
            aggregation_method: aggregated.method,
            decision: aggregated.decision,
            deciding_policy: aggregated.deciding_policy.clone(),
            evaluations: aggregated.evaluations.clone(),
        };
        self.commit(&mut workflow, WalEntryData::PolicyEvaluated(batch))?;
        self.settle(&mut workflow)?;

        tracing::info!(
            workflow_id = %workflow_id,
            step_id = %step_id,
            decision = %aggregated.decision,
            method = %aggregated.method,
            state = %workflow.state,
            "pre-flight evaluated"
        );
        Ok((aggregated, workflow.clone()))
    }

    /// Issue an approval request bound to the current plan token.
    pub fn request_approval(
        &self,
        workflow_id: &str,
        step_id: &str,
        required_role: &str,
        reason: &str,
        evidence: Vec<PreflightEvidence>,
    ) -> Result<ApprovalRequest, OrchestratorError> {
        let request = self.with_workflow(workflow_id, |workflow| {
            let request = self.binder.request(
                workflow,
                step_id,
                required_role,
                reason,
                evidence,
                Utc::now(),
            )?;
            self.commit(workflow, WalEntryData::ApprovalRequested(request.clone()))?;
            Ok(request)
        })?;

        self.approvals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.approval_id.clone(), workflow_id.to_string());

        tracing::info!(
            workflow_id = %workflow_id,
            approval_id = %request.approval_id,
            required_role = %request.required_role,
            "approval requested"
        );
        Ok(request)
    }

    /// Validate and record an approval response.
    ///
    /// A response bound to a different plan token is a replay: it is
    /// refused, and a workflow still awaiting approval is failed with
    /// `replay_rejected`. An approver without the required role is refused
    /// without changing the workflow.
    pub fn submit_approval(
        &self,
        response: &ApprovalResponse,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow_id = self.approval_workflow(&response.approval_id)?;

        self.with_workflow(&workflow_id, |workflow| {
            match self.binder.accept(workflow, response, Utc::now()) {
                Ok(record) => {
                    let approved = record.approved;
                    self.commit(workflow, WalEntryData::ApprovalReceived(record))?;
                    self.settle(workflow)?;
                    tracing::info!(
                        workflow_id = %workflow.workflow_id,
                        approval_id = %response.approval_id,
                        approver = %response.approver,
                        approved,
                        "approval recorded"
                    );
                    Ok(workflow.clone())
                }
                Err(e @ ApprovalError::ReplayRejected { .. }) => {
                    tracing::warn!(
                        workflow_id = %workflow.workflow_id,
                        approval_id = %response.approval_id,
                        error = %e,
                        "approval replay rejected"
                    );
                    if workflow.state == WorkflowState::AwaitingApproval {
                        let mut failed =
                            WorkflowFailed::new(FailureKind::ReplayRejected, e.to_string());
                        if let Some(request) = workflow.pending_approvals.get(&response.approval_id)
                        {
                            failed = failed.with_step(&request.step_id);
                        }
                        self.commit(workflow, WalEntryData::WorkflowFailed(failed))?;
                    }
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn begin_takeoff(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Workflow, OrchestratorError> {
        self.begin_step(workflow_id, step_id, StepType::TakeOff)
    }

    /// Engine input for a take-off run, carrying the plan token the engine
    /// must execute against.
    pub fn takeoff_input(
        &self,
        workflow_id: &str,
        step_id: &str,
        config: Metadata,
        context: Metadata,
    ) -> Result<EngineInput, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| {
            self.expect_pending(workflow, step_id, StepType::TakeOff)?;
            let token =
                workflow
                    .plan_token
                    .as_ref()
                    .ok_or_else(|| OrchestratorError::InvalidTransition {
                        workflow_id: workflow.workflow_id.clone(),
                        state: workflow.state,
                        entry_type: "engine_input".into(),
                        reason: "no plan token to execute against".into(),
                    })?;
            Ok(EngineInput {
                protocol_version: token.protocol_version.clone(),
                mode: Mode::TakeOff,
                meta: EngineMeta {
                    workflow_id: workflow.workflow_id.clone(),
                    step_id: step_id.to_string(),
                },
                config,
                context,
                orchestrator: EngineOrchestrator {
                    run_index: None,
                    workspace_hash: Some(token.workspace_hash.clone()),
                    artifacts_salt: None,
                },
                expected_plan_token: Some(token.token.clone()),
            })
        })
    }

    /// Record a take-off engine's output and verify it against the plan
    /// token. Ends in COMPLETED or FAILED.
    pub fn submit_takeoff(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: &EngineOutput,
    ) -> Result<Workflow, OrchestratorError> {
        expect_mode(output, Mode::TakeOff)?;
        let completed = step_completed(step_id, StepType::TakeOff, output, None);
        self.with_workflow(workflow_id, |workflow| {
            self.commit(workflow, WalEntryData::StepCompleted(completed))?;
            self.settle(workflow)?;
            tracing::info!(
                workflow_id = %workflow.workflow_id,
                state = %workflow.state,
                "take-off recorded"
            );
            Ok(workflow.clone())
        })
    }

    /// Track an auxiliary artifact. Plan tokens are minted only by the
    /// orchestrator and cannot be recorded here.
    pub fn record_artifact(
        &self,
        workflow_id: &str,
        artifact: ArtifactCreated,
    ) -> Result<Workflow, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| {
            if artifact.artifact_type == PLAN_TOKEN_ARTIFACT_TYPE {
                return Err(OrchestratorError::InvalidTransition {
                    workflow_id: workflow.workflow_id.clone(),
                    state: workflow.state,
                    entry_type: "artifact_created".into(),
                    reason: "plan tokens are minted by the orchestrator".into(),
                });
            }
            self.commit(workflow, WalEntryData::ArtifactCreated(artifact))?;
            Ok(workflow.clone())
        })
    }

    /// Fail a non-terminal workflow on operator request.
    pub fn cancel(&self, workflow_id: &str, reason: &str) -> Result<Workflow, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| {
            let failed = WorkflowFailed::new(FailureKind::Cancelled, reason);
            self.commit(workflow, WalEntryData::WorkflowFailed(failed))?;
            tracing::info!(workflow_id = %workflow.workflow_id, reason, "workflow cancelled");
            Ok(workflow.clone())
        })
    }

    // ── Queries ──

    pub fn snapshot(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| Ok(workflow.clone()))
    }

    /// Loaded and evicted workflows, ordered by id.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let slots: Vec<Slot> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut summaries: BTreeMap<String, WorkflowSummary> = self
            .retired
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for slot in &slots {
            let summary = WorkflowSummary::from(&*slot.lock().unwrap_or_else(PoisonError::into_inner));
            summaries.insert(summary.workflow_id.clone(), summary);
        }
        summaries.into_values().collect()
    }

    pub fn quarantined(&self) -> Vec<QuarantineRecord> {
        self.quarantine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // ── Recovery ──

    /// Rebuild every workflow in the WAL, catch the audit chain up, and
    /// resume automatic transitions a crash interrupted.
    ///
    /// Workflows whose log fails integrity checks are quarantined. Any other
    /// error is recorded in `failed`. Neither stops recovery of the others.
    pub fn recover(&self) -> Result<RecoveryReport, OrchestratorError> {
        let mut report = RecoveryReport::default();
        let _loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);

        for workflow_id in self.wal.workflows()? {
            if self.is_known(&workflow_id) {
                continue;
            }
            match self.load_locked(&workflow_id) {
                Ok(Some((slot, reemitted))) => {
                    report.audit_reemitted += reemitted;
                    let workflow = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    if workflow.is_terminal() {
                        report.terminal.push(workflow_id);
                    } else {
                        report.recovered.push(workflow_id);
                    }
                }
                Ok(None) => {}
                Err(OrchestratorError::Quarantined {
                    workflow_id,
                    kind,
                    reason,
                }) => report.quarantined.push(QuarantineRecord {
                    workflow_id,
                    kind,
                    reason,
                }),
                Err(e) => {
                    tracing::error!(workflow_id = %workflow_id, error = %e, "workflow recovery failed");
                    report.failed.push(RecoveryFailure {
                        workflow_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            recovered = report.recovered.len(),
            terminal = report.terminal.len(),
            quarantined = report.quarantined.len(),
            failed = report.failed.len(),
            audit_reemitted = report.audit_reemitted,
            "recovery complete"
        );
        Ok(report)
    }

    // ── Internals ──

    fn begin_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        step_type: StepType,
    ) -> Result<Workflow, OrchestratorError> {
        self.with_workflow(workflow_id, |workflow| {
            let step = StepStarted {
                step_id: step_id.to_string(),
                step_type,
            };
            self.commit(workflow, WalEntryData::StepStarted(step))?;
            tracing::debug!(
                workflow_id = %workflow.workflow_id,
                step_id,
                step_type = %step_type,
                "step started"
            );
            Ok(workflow.clone())
        })
    }

    fn expect_pending(
        &self,
        workflow: &Workflow,
        step_id: &str,
        step_type: StepType,
    ) -> Result<(), OrchestratorError> {
        if workflow.steps_pending.get(step_id) == Some(&step_type) {
            return Ok(());
        }
        Err(OrchestratorError::InvalidTransition {
            workflow_id: workflow.workflow_id.clone(),
            state: workflow.state,
            entry_type: "engine_input".into(),
            reason: format!("'{}' is not a running {} step", step_id, step_type),
        })
    }

    fn with_workflow<T>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut Workflow) -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let slot = self.slot(workflow_id)?;
        let mut workflow = slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Quarantine can be imposed while we waited for the lock.
        if let Some(record) = self.quarantine_record(workflow_id) {
            return Err(quarantined_error(record));
        }
        let result = f(&mut workflow);
        if workflow.is_terminal() {
            self.retain_terminal(WorkflowSummary::from(&*workflow));
        }
        result
    }

    fn slot(&self, workflow_id: &str) -> Result<Slot, OrchestratorError> {
        if let Some(record) = self.quarantine_record(workflow_id) {
            return Err(quarantined_error(record));
        }
        if let Some(slot) = self.loaded(workflow_id) {
            return Ok(slot);
        }

        let _loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = self.loaded(workflow_id) {
            return Ok(slot);
        }
        match self.load_locked(workflow_id)? {
            Some((slot, _)) => Ok(slot),
            None => Err(OrchestratorError::NotFound(workflow_id.to_string())),
        }
    }

    fn loaded(&self, workflow_id: &str) -> Option<Slot> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
    }

    fn is_loaded(&self, workflow_id: &str) -> bool {
        self.loaded(workflow_id).is_some()
    }

    fn is_known(&self, workflow_id: &str) -> bool {
        self.is_loaded(workflow_id)
            || self
                .retired
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(workflow_id)
    }

    fn indexed_approval(&self, approval_id: &str) -> Option<String> {
        self.approvals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(approval_id)
            .cloned()
    }

    /// Workflow owning `approval_id`. Unloaded workflows in the WAL are
    /// loaded until one indexes it.
    fn approval_workflow(&self, approval_id: &str) -> Result<String, OrchestratorError> {
        if let Some(workflow_id) = self.indexed_approval(approval_id) {
            return Ok(workflow_id);
        }
        for workflow_id in self.wal.workflows()? {
            if self.is_known(&workflow_id) || self.quarantine_record(&workflow_id).is_some() {
                continue;
            }
            if let Err(e) = self.slot(&workflow_id) {
                tracing::warn!(workflow_id = %workflow_id, error = %e, "skipped while locating approval");
                continue;
            }
            if let Some(workflow_id) = self.indexed_approval(approval_id) {
                return Ok(workflow_id);
            }
        }
        Err(ApprovalError::UnknownApproval(approval_id.to_string()).into())
    }

    /// Track a terminal workflow, evicting the oldest beyond the bound.
    fn retain_terminal(&self, summary: WorkflowSummary) {
        let mut terminal = self.terminal.lock().unwrap_or_else(PoisonError::into_inner);
        if terminal.iter().any(|s| s.workflow_id == summary.workflow_id) {
            return;
        }
        terminal.push_back(summary);
        while terminal.len() > self.retain_terminal {
            if let Some(summary) = terminal.pop_front() {
                self.evict(summary);
            }
        }
    }

    fn evict(&self, summary: WorkflowSummary) {
        let workflow_id = summary.workflow_id.clone();
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&workflow_id);
        self.approvals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| *owner != workflow_id);
        self.retired
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow_id.clone(), summary);
        tracing::debug!(workflow_id = %workflow_id, "terminal workflow evicted");
    }

    // Caller holds `loading`.
    fn load_locked(&self, workflow_id: &str) -> Result<Option<(Slot, usize)>, OrchestratorError> {
        let mut workflow = match self.rebuild(workflow_id) {
            Ok(workflow) => workflow,
            Err(e) => return Err(self.quarantine_on(workflow_id, e)),
        };
        if workflow.last_sequence == 0 {
            return Ok(None);
        }

        let reemitted = match self.reemit_audit(workflow_id) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(workflow_id, error = %e, "audit catch-up failed");
                0
            }
        };

        if !workflow.is_terminal() {
            let before = workflow.last_sequence;
            self.settle(&mut workflow)?;
            if workflow.last_sequence != before {
                tracing::info!(
                    workflow_id,
                    from = before,
                    to = workflow.last_sequence,
                    state = %workflow.state,
                    "resumed interrupted transitions"
                );
            }
        }

        {
            let mut approvals = self.approvals.write().unwrap_or_else(PoisonError::into_inner);
            for approval_id in workflow
                .pending_approvals
                .keys()
                .chain(workflow.approvals.iter().map(|a| &a.approval_id))
            {
                approvals.insert(approval_id.clone(), workflow_id.to_string());
            }
        }

        let terminal = workflow.is_terminal().then(|| WorkflowSummary::from(&workflow));
        let slot: Slot = Arc::new(Mutex::new(workflow));
        let slot = self
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(workflow_id.to_string())
            .or_insert(slot)
            .clone();
        self.retired
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id);
        if let Some(summary) = terminal {
            self.retain_terminal(summary);
        }
        Ok(Some((slot, reemitted)))
    }

    fn rebuild(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        Workflow::replay(workflow_id, self.wal.replay(workflow_id)?)
    }

    /// Emit audit events for every WAL entry past the sink's head.
    fn reemit_audit(&self, workflow_id: &str) -> Result<usize, OrchestratorError> {
        let head = self
            .audit
            .head(workflow_id)?
            .map(|h| h.sequence)
            .unwrap_or(0);

        let mut workflow = Workflow::new(workflow_id);
        let mut emitted = 0;
        for entry in self.wal.replay(workflow_id)? {
            let entry = entry?;
            workflow.apply(&entry)?;
            if entry.sequence > head {
                self.audit.emit(audit_event(&entry, &workflow))?;
                emitted += 1;
            }
        }
        if emitted > 0 {
            tracing::warn!(workflow_id, emitted, from = head + 1, "audit events re-emitted from WAL");
        }
        Ok(emitted)
    }

    /// Guard, append, apply, audit.
    fn commit(
        &self,
        workflow: &mut Workflow,
        data: WalEntryData,
    ) -> Result<WalEntry, OrchestratorError> {
        workflow.plan(&data)?;

        let entry = match self.wal.append(&workflow.workflow_id, data) {
            Ok(entry) => entry,
            Err(e) => {
                let workflow_id = workflow.workflow_id.clone();
                return Err(if e.is_integrity_fault() {
                    self.quarantine_on(&workflow_id, OrchestratorError::Wal(e))
                } else {
                    e.into()
                });
            }
        };
        workflow.apply(&entry)?;
        self.mirror(&entry, workflow);
        Ok(entry)
    }

    fn mirror(&self, entry: &WalEntry, after: &Workflow) {
        let head = match self.audit.head(&entry.workflow_id) {
            Ok(head) => head.map(|h| h.sequence).unwrap_or(0),
            Err(e) => {
                tracing::error!(workflow_id = %entry.workflow_id, error = %e, "audit head unavailable");
                return;
            }
        };

        let result = if head + 1 == entry.sequence {
            self.audit.emit(audit_event(entry, after)).map(|_| ()).map_err(OrchestratorError::from)
        } else if head < entry.sequence {
            self.reemit_audit(&entry.workflow_id).map(|_| ())
        } else {
            Ok(())
        };
        if let Err(e) = result {
            tracing::error!(
                workflow_id = %entry.workflow_id,
                sequence = entry.sequence,
                error = %e,
                "audit emission failed; will catch up from WAL"
            );
        }
    }

    /// Commit owed automatic entries until none remain.
    fn settle(&self, workflow: &mut Workflow) -> Result<(), OrchestratorError> {
        while let Some(data) = next_entry(workflow, &self.codec) {
            let entry = self.commit(workflow, data)?;
            if let WalEntryData::WorkflowFailed(failed) = &entry.data {
                tracing::warn!(
                    workflow_id = %workflow.workflow_id,
                    kind = %failed.error,
                    message = %failed.message,
                    "workflow failed"
                );
            }
        }
        Ok(())
    }

    fn quarantine_record(&self, workflow_id: &str) -> Option<QuarantineRecord> {
        self.quarantine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
    }

    /// Quarantine for a WAL that cannot be trusted; other errors pass through.
    fn quarantine_on(&self, workflow_id: &str, error: OrchestratorError) -> OrchestratorError {
        let kind = match &error {
            OrchestratorError::Wal(e) if e.is_integrity_fault() => e.failure_kind(),
            OrchestratorError::OutOfSequence { .. } => Some(FailureKind::SequenceGap),
            OrchestratorError::InvalidTransition { .. } | OrchestratorError::Terminal { .. } => {
                Some(FailureKind::IntegrityViolation)
            }
            _ => None,
        };
        let Some(kind) = kind else {
            return error;
        };

        let record = QuarantineRecord {
            workflow_id: workflow_id.to_string(),
            kind,
            reason: error.to_string(),
        };
        tracing::error!(
            workflow_id,
            kind = %kind,
            reason = %record.reason,
            "workflow quarantined"
        );
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id);
        self.quarantine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow_id.to_string(), record.clone());
        quarantined_error(record)
    }
}

fn quarantined_error(record: QuarantineRecord) -> OrchestratorError {
    OrchestratorError::Quarantined {
        workflow_id: record.workflow_id,
        kind: record.kind,
        reason: record.reason,
    }
}

fn expect_mode(output: &EngineOutput, mode: Mode) -> Result<(), OrchestratorError> {
    if output.mode != mode {
        return Err(OrchestratorError::InvalidEngineOutput(format!(
            "engine '{}' returned {:?} output, expected {:?}",
            output.engine_id, output.mode, mode
        )));
    }
    Ok(())
}

fn step_completed(
    step_id: &str,
    step_type: StepType,
    output: &EngineOutput,
    plan_inputs: Option<PlanInputs>,
) -> StepCompleted {
    StepCompleted {
        step_id: step_id.to_string(),
        step_type,
        engine_id: output.engine_id.clone(),
        protocol_version: output.protocol_version.clone(),
        receipt_id: output.receipt_id.clone(),
        status: output.status,
        error: (!output.is_success()).then(|| output.failure_reason()),
        warnings: output.warnings.clone(),
        artifacts: output.artifacts.clone(),
        plan_token: output.plan_token.clone(),
        plan_inputs,
    }
}

fn load_signer(
    config: &OrchestratorConfig,
    path: &Path,
) -> Result<Arc<dyn ChainSigner>, OrchestratorError> {
    Ok(Arc::new(Ed25519Signer::from_pkcs8_file(
        config.audit.key_ref(),
        path,
    )?))
}
