// evaluation.rs — One policy engine's verdict, and the durable record of a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cc_protocol::{Decision, Metadata};

use crate::aggregator::AggregationMethod;
use crate::error::PolicyError;

/// Which kind of policy engine produced an evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Opa,
    Onnx,
    LlmGateway,
    McpGateway,
    Custom,
}

/// A single policy engine's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyEvaluation {
    /// Policy identifier (OPA policy name, ONNX model name, gateway rule id).
    pub policy_id: String,
    pub source: PolicySource,
    pub decision: Decision,
    /// 0=allow, 1=warn, 2=require_approval, 3=deny. Must agree with `decision`.
    pub severity: u8,
    pub evaluated_at: DateTime<Utc>,
    /// Supporting evidence (rule matches, model scores). Passed through uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyEvaluation {
    /// Build an evaluation whose severity is derived from the decision.
    pub fn new(
        policy_id: impl Into<String>,
        source: PolicySource,
        decision: Decision,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            source,
            decision,
            severity: decision.severity(),
            evaluated_at,
            evidence: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Metadata) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Reject evaluations whose severity and decision disagree.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let expected = self.decision.severity();
        if self.severity != expected {
            return Err(PolicyError::SeverityMismatch {
                policy_id: self.policy_id.clone(),
                decision: self.decision.to_string(),
                severity: self.severity,
                expected,
            });
        }
        Ok(())
    }
}

/// Durable summary of one aggregated batch, kept on the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyEvaluationRecord {
    pub evaluation_id: String,
    pub step_id: String,
    pub aggregation_method: AggregationMethod,
    pub decision: Decision,
    /// Policies that contributed, in arrival order.
    pub policy_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}
