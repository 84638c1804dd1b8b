//! # cc-protocol
//!
//! Shared data model for the CabinCrew governance kernel.
//!
//! Every agent action is split into a *flight-plan* (proposed artifacts) and a
//! *take-off* (execution). This crate holds the records that travel between
//! the orchestrator and its collaborators:
//!
//! - [`Decision`] — the four-valued policy verdict with its severity order
//! - [`WorkflowState`] and [`FailureKind`] — lifecycle states and the failure taxonomy
//! - [`EngineInput`] / [`EngineOutput`] — the engine adapter contract
//! - [`ApprovalRequest`] / [`ApprovalResponse`] / [`ApprovalRecord`] — human approval binding
//! - [`hasher`] — SHA-256 and canonical-JSON hashing shared by every crate

pub mod approval;
pub mod decision;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod records;
pub mod state;

use std::collections::BTreeMap;

pub use approval::{ApprovalRecord, ApprovalRequest, ApprovalResponse, PreflightEvidence};
pub use decision::Decision;
pub use engine::{
    EngineArtifact, EngineInput, EngineMeta, EngineMetric, EngineOrchestrator, EngineOutput,
    EngineStatus, Mode, PROTOCOL_VERSION,
};
pub use error::ProtocolError;
pub use records::{ArtifactRecord, StepType};
pub use state::{FailureKind, WorkflowState};

/// Opaque key → JSON mapping passed through without interpretation.
///
/// `BTreeMap` keeps keys ordered so the canonical serialization is stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;
