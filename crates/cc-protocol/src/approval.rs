// approval.rs — Human approval records.
//
// An approval is always bound to the plan-token hash that was current when
// it was solicited. The orchestrator refuses any response whose binding no
// longer matches the workflow's token, so an approval for one plan can never
// be replayed against a mutated plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evidence attached to an approval request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightEvidence {
    pub name: String,
    pub path: String,
    pub hash: String,
}

/// A request for human approval before take-off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub reason: String,
    pub required_role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<PreflightEvidence>,
    /// Plan-token hash this request is bound to. Immutable once issued.
    pub plan_token_hash: String,
    pub requested_at: DateTime<Utc>,
}

/// A response delivered by the identity/approval channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalResponse {
    pub approval_id: String,
    pub approved: bool,
    pub approver: String,
    /// Plan-token hash the approver saw.
    pub plan_token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Client-supplied time. Informational only; `ApprovalRecord::approved_at` is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Durable record of an accepted approval response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub step_id: String,
    pub plan_token_hash: String,
    pub approved: bool,
    pub approver: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_hashes: Vec<String>,
}
