// verdict.rs — Adapters from engine and gateway verdicts to PolicyEvaluation.
//
// Pre-flight policy engines answer with a PreflightOutput; the LLM and MCP
// gateways answer with their own response records. The aggregator only sees
// PolicyEvaluation, so each verdict is lowered here with a severity that
// always agrees with its decision. Violations and warnings travel as
// evidence; rewritten payloads are noted but never interpreted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cc_protocol::{Decision, Metadata};

use crate::evaluation::{PolicyEvaluation, PolicySource};

/// What a `require_approval` verdict asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightRequires {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Output of a pre-flight policy engine run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightOutput {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<PreflightRequires>,
}

impl PreflightOutput {
    pub fn into_evaluation(
        self,
        policy_id: impl Into<String>,
        source: PolicySource,
        evaluated_at: DateTime<Utc>,
    ) -> PolicyEvaluation {
        let reason = self
            .requires
            .as_ref()
            .and_then(|r| r.reason.clone())
            .or_else(|| join_nonempty(&self.violations))
            .or_else(|| join_nonempty(&self.warnings));

        let mut evidence = findings_evidence(&self.violations, &self.warnings);
        if let Some(role) = self.requires.as_ref().and_then(|r| r.role.as_ref()) {
            evidence.insert("required_role".to_string(), json!(role));
        }

        let mut evaluation = PolicyEvaluation::new(policy_id, source, self.decision, evaluated_at);
        evaluation.reason = reason;
        if !evidence.is_empty() {
            evaluation.evidence = Some(evidence);
        }
        evaluation
    }
}

/// Which gateway produced a verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Llm,
    Mcp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayApproval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An LLM or MCP gateway response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayVerdict {
    pub request_id: String,
    pub gateway: GatewayKind,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<GatewayApproval>,
    /// Rewritten request/input payload. Opaque to the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_payload: Option<serde_json::Value>,
}

impl GatewayVerdict {
    /// Lower to an evaluation with `policy_id = "<gateway>_gateway:<request_id>"`.
    pub fn into_evaluation(self) -> PolicyEvaluation {
        let (source, prefix) = match self.gateway {
            GatewayKind::Llm => (PolicySource::LlmGateway, "llm_gateway"),
            GatewayKind::Mcp => (PolicySource::McpGateway, "mcp_gateway"),
        };

        let reason = self
            .approval
            .as_ref()
            .and_then(|a| a.reason.clone())
            .or_else(|| join_nonempty(&self.violations))
            .or_else(|| join_nonempty(&self.warnings));

        let mut evidence = findings_evidence(&self.violations, &self.warnings);
        if self.rewritten_payload.is_some() {
            evidence.insert("payload_rewritten".to_string(), json!(true));
        }
        if let Some(role) = self.approval.as_ref().and_then(|a| a.required_role.as_ref()) {
            evidence.insert("required_role".to_string(), json!(role));
        }

        let mut evaluation = PolicyEvaluation::new(
            format!("{}:{}", prefix, self.request_id),
            source,
            self.decision,
            self.timestamp,
        );
        evaluation.reason = reason;
        if !evidence.is_empty() {
            evaluation.evidence = Some(evidence);
        }
        evaluation
    }
}

fn join_nonempty(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join("; "))
    }
}

fn findings_evidence(violations: &[String], warnings: &[String]) -> Metadata {
    let mut evidence = Metadata::new();
    if !violations.is_empty() {
        evidence.insert("violations".to_string(), json!(violations));
    }
    if !warnings.is_empty() {
        evidence.insert("warnings".to_string(), json!(warnings));
    }
    evidence
}
