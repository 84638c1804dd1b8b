//! # cc-audit
//!
//! Mirrors every workflow transition as a hash-chained [`AuditEvent`] for
//! external ledger consumption.
//!
//! ## Key components
//!
//! - [`AuditEvent`]: one mirrored WAL entry with structured sections
//!   (workflow, engine, plan token, artifacts, policy, approval, integrity).
//! - [`AuditEmitter`]: assigns `chain_hash = SHA-256(previous ‖ content)`,
//!   optionally signs it, and hands the event to an [`AuditSink`].
//! - [`verify_chain`]: recomputes every chain hash and names the first
//!   offending event.
//! - [`Ed25519Signer`]: local [`ChainSigner`] and [`KeyService`].
//!
//! Chains are per workflow. The first event of a workflow chains from
//! [`GENESIS_HASH`].

pub mod chain;
pub mod error;
pub mod event;
pub mod signer;
pub mod sink;

pub use chain::{verify_chain, verify_signatures, AuditEmitter, ChainHead, GENESIS_HASH};
pub use error::AuditError;
pub use event::{
    ApprovalSection, ArtifactRef, AuditEvent, AuditSeverity, EngineSection, GatewaySection,
    IntegritySection, PlanTokenSection, PolicySection, WorkflowSection,
};
pub use signer::{ChainSigner, Ed25519Signer, KeyService};
pub use sink::{AuditSink, JsonlAuditSink, MemoryAuditSink};
