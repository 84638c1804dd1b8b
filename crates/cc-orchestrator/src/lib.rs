//! # cc-orchestrator
//!
//! Governance orchestrator for CabinCrew: drives each agent action from
//! flight-plan through pre-flight and optional human approval to take-off,
//! writing every transition to the WAL before it takes effect and mirroring
//! it into the hash-chained audit trail.
//!
//! ## Key components
//!
//! - [`Workflow`] — the state machine, rebuilt only by applying WAL entries
//! - [`Orchestrator`] — lifecycle operations, automatic follow-ups, recovery
//! - [`ApprovalBinder`] — binds approvals to the plan token they were issued for
//! - [`IdentityProvider`] / [`StaticRoleDirectory`] — approver role checks
//! - [`OrchestratorConfig`] — `.cabincrew/config.toml` with project defaults
//!
//! ## Key invariants
//!
//! - An entry that the current state does not allow is refused before
//!   anything is written.
//! - Replaying the same WAL always produces the same workflow and the same
//!   audit chain.
//! - A workflow whose WAL fails integrity checks is quarantined, not advanced.

pub mod approval;
pub mod audit_map;
pub mod config;
pub mod error;
pub mod followup;
pub mod orchestrator;
pub mod workflow;

pub use approval::{ApprovalBinder, IdentityProvider, StaticRoleDirectory};
pub use audit_map::audit_event;
pub use config::{
    ApprovalSettings, AuditSettings, OrchestratorConfig, WalSettings, DEFAULT_KEY_REF,
    DEFAULT_RETAIN_TERMINAL, STATE_DIR,
};
pub use error::{ApprovalError, OrchestratorError};
pub use followup::next_entry;
pub use orchestrator::{
    Orchestrator, QuarantineRecord, RecoveryFailure, RecoveryReport, WorkflowSummary,
};
pub use workflow::{FailureRecord, FlightPlanRecord, StateChange, StepFailure, TakeoffRecord, Workflow};
