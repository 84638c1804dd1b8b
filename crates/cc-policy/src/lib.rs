//! # cc-policy
//!
//! Combines independent policy verdicts into one deterministic [`Decision`].
//!
//! Policy engines (OPA, ONNX, custom) and request gateways (LLM, MCP) each
//! produce a [`PolicyEvaluation`]. The [`PolicyAggregator`] reduces a batch of
//! them to an [`AggregatedDecision`] using one [`AggregationMethod`].
//!
//! ## Key invariants
//!
//! - **Consistent severity**: an evaluation whose `severity` disagrees with its
//!   `decision` is rejected before aggregation.
//! - **Order independence**: the arrival order of evaluations never changes the
//!   decision. Ties resolve by severity, then by smallest `policy_id`.
//! - **Purity**: aggregation has no side effects, so every orchestrator replica
//!   replaying the same log reaches the same decision.
//!
//! [`Decision`]: cc_protocol::Decision

pub mod aggregator;
pub mod error;
pub mod evaluation;
pub mod verdict;

pub use aggregator::{AggregatedDecision, AggregationMethod, CustomAggregator, PolicyAggregator};
pub use error::PolicyError;
pub use evaluation::{PolicyEvaluation, PolicyEvaluationRecord, PolicySource};
pub use verdict::{GatewayApproval, GatewayKind, GatewayVerdict, PreflightOutput, PreflightRequires};
