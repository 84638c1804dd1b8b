// error.rs — Error types for policy aggregation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// An evaluation's numeric severity does not match its decision.
    #[error("policy '{policy_id}' reports severity {severity} for decision '{decision}' (expected {expected})")]
    SeverityMismatch {
        policy_id: String,
        decision: String,
        severity: u8,
        expected: u8,
    },

    /// Aggregation was asked to decide over nothing.
    #[error("no policy evaluations to aggregate")]
    NoEvaluations,

    /// `custom` aggregation was selected but no external aggregator is attached.
    #[error("custom aggregation requested but no custom aggregator is configured")]
    CustomAggregatorMissing,

    /// The external custom aggregator failed to resolve a decision.
    #[error("custom aggregator '{name}' failed: {reason}")]
    CustomAggregatorFailed { name: String, reason: String },

    /// An aggregation method name was not recognized.
    #[error("unknown aggregation method '{0}'")]
    UnknownMethod(String),
}
