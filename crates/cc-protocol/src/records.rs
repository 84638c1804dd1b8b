// records.rs — Durable workflow bookkeeping records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which phase a workflow step belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    FlightPlan,
    PreFlight,
    TakeOff,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::FlightPlan => write!(f, "flight_plan"),
            StepType::PreFlight => write!(f, "pre_flight"),
            StepType::TakeOff => write!(f, "take_off"),
        }
    }
}

/// An artifact tracked for integrity verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// SHA-256 of the artifact content.
    pub artifact_hash: String,
    pub artifact_type: String,
    pub created_at: DateTime<Utc>,
}
