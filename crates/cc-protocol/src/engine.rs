// engine.rs — Engine adapter contract.
//
// Engine adapters are external processes that run one step of an agent
// action. They receive an EngineInput and answer with an EngineOutput. The
// orchestrator never looks inside the adapter; it only consumes the typed
// output as the trigger for `step_completed` or a failure transition.

use serde::{Deserialize, Serialize};

use crate::Metadata;

/// Engine adapter protocol version spoken by this orchestrator.
pub const PROTOCOL_VERSION: &str = "1";

/// Execution mode of an engine run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Mode {
    #[serde(rename = "flight-plan")]
    FlightPlan,
    #[serde(rename = "take-off")]
    TakeOff,
}

/// Terminal status reported by an engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineMeta {
    pub workflow_id: String,
    pub step_id: String,
}

/// Orchestrator-provided context for an engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineOrchestrator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_salt: Option<String>,
}

/// Input handed to an engine adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineInput {
    pub protocol_version: String,
    pub mode: Mode,
    pub meta: EngineMeta,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub config: Metadata,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub context: Metadata,
    #[serde(default)]
    pub orchestrator: EngineOrchestrator,
    /// For take-off runs: the plan-token hash the engine must execute against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_plan_token: Option<String>,
}

/// One artifact produced by an engine run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineArtifact {
    pub name: String,
    pub role: String,
    pub path: String,
    /// SHA-256 of the artifact content.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineMetric {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub tags: Metadata,
}

/// Output returned by an engine adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineOutput {
    pub protocol_version: String,
    pub engine_id: String,
    pub mode: Mode,
    pub receipt_id: String,
    pub status: EngineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<EngineArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<EngineMetric>,
    /// Plan-token hash the engine claims to have executed against (take-off).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_token: Option<String>,
}

impl EngineOutput {
    pub fn is_success(&self) -> bool {
        self.status == EngineStatus::Success
    }

    /// Human-readable failure reason, falling back to a generic message.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("engine '{}' reported failure", self.engine_id))
    }
}
