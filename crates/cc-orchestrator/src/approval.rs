// approval.rs — Approval Binding Manager.
//
// A request captures the workflow's plan-token hash at the moment it is
// issued, and that binding never changes. A response is accepted only if
// the approver saw the same token the request was bound to AND that token
// is still the workflow's current token. Anything else is a replay: an
// approval for one plan presented against another.
//
// Role satisfaction is delegated to an IdentityProvider so deployments can
// plug in their directory service.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cc_protocol::{
    ApprovalRecord, ApprovalRequest, ApprovalResponse, PreflightEvidence, WorkflowState,
};

use crate::error::ApprovalError;
use crate::workflow::Workflow;

/// Decides whether an approver holds a role.
pub trait IdentityProvider: Send + Sync {
    fn satisfies(&self, approver: &str, required_role: &str) -> bool;
}

/// Fixed approver → roles table, typically loaded from config.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleDirectory {
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl StaticRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, approver: impl Into<String>, role: impl Into<String>) -> Self {
        self.roles
            .entry(approver.into())
            .or_default()
            .insert(role.into());
        self
    }

    pub fn from_map(roles: &BTreeMap<String, Vec<String>>) -> Self {
        let roles = roles
            .iter()
            .map(|(approver, roles)| (approver.clone(), roles.iter().cloned().collect()))
            .collect();
        Self { roles }
    }
}

impl IdentityProvider for StaticRoleDirectory {
    fn satisfies(&self, approver: &str, required_role: &str) -> bool {
        self.roles
            .get(approver)
            .is_some_and(|roles| roles.contains(required_role))
    }
}

/// Issues bound approval requests and validates responses against them.
#[derive(Clone)]
pub struct ApprovalBinder {
    identity: Arc<dyn IdentityProvider>,
}

impl ApprovalBinder {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Build a request bound to the workflow's current plan-token hash.
    pub fn request(
        &self,
        workflow: &Workflow,
        step_id: impl Into<String>,
        required_role: impl Into<String>,
        reason: impl Into<String>,
        evidence: Vec<PreflightEvidence>,
        requested_at: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if workflow.state != WorkflowState::AwaitingApproval {
            return Err(ApprovalError::NotAwaitingApproval {
                workflow_id: workflow.workflow_id.clone(),
                state: workflow.state,
            });
        }
        let plan_token_hash =
            workflow
                .plan_token_hash
                .clone()
                .ok_or_else(|| ApprovalError::NoPlanToken {
                    workflow_id: workflow.workflow_id.clone(),
                })?;

        Ok(ApprovalRequest {
            approval_id: Uuid::new_v4().to_string(),
            workflow_id: workflow.workflow_id.clone(),
            step_id: step_id.into(),
            reason: reason.into(),
            required_role: required_role.into(),
            evidence,
            plan_token_hash,
            requested_at,
        })
    }

    /// Validate a response and produce the durable record.
    ///
    /// `approved_at` is `now`; any client-supplied timestamp is ignored.
    pub fn accept(
        &self,
        workflow: &Workflow,
        response: &ApprovalResponse,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let replay = |reason: &str| ApprovalError::ReplayRejected {
            approval_id: response.approval_id.clone(),
            reason: reason.to_string(),
        };

        let Some(request) = workflow.pending_approvals.get(&response.approval_id) else {
            if workflow
                .approvals
                .iter()
                .any(|a| a.approval_id == response.approval_id)
            {
                return Err(replay("approval was already resolved"));
            }
            return Err(ApprovalError::UnknownApproval(response.approval_id.clone()));
        };

        let current = workflow.plan_token_hash.as_deref();
        if current != Some(request.plan_token_hash.as_str()) {
            return Err(replay("plan token changed since the approval was requested"));
        }
        if response.plan_token_hash != request.plan_token_hash {
            return Err(replay("response is bound to a different plan token"));
        }
        if !self.identity.satisfies(&response.approver, &request.required_role) {
            return Err(ApprovalError::RoleNotSatisfied {
                approver: response.approver.clone(),
                required_role: request.required_role.clone(),
            });
        }

        Ok(ApprovalRecord {
            approval_id: request.approval_id.clone(),
            step_id: request.step_id.clone(),
            plan_token_hash: request.plan_token_hash.clone(),
            approved: response.approved,
            approver: response.approver.clone(),
            approved_at: now,
            reason: response.reason.clone(),
            evidence_hashes: request.evidence.iter().map(|e| e.hash.clone()).collect(),
        })
    }
}
