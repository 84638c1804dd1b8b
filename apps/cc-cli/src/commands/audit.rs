// audit.rs — Audit subcommands: verify, tail.

use std::path::PathBuf;

use clap::Subcommand;
use cc_audit::{verify_chain, verify_signatures, AuditError, Ed25519Signer, JsonlAuditSink};
use cc_orchestrator::OrchestratorConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit hash chain, and signatures when a key is configured.
    Verify {
        /// Path to audit log (defaults to .cabincrew/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit events.
    Tail {
        /// Path to audit log (defaults to .cabincrew/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Only show events for this workflow.
        #[arg(long)]
        workflow: Option<String>,
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

pub fn execute(cmd: &AuditCommands, config: &OrchestratorConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| config.audit.log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let events = JsonlAuditSink::read_all(&path)?;
            match verify_chain(&events) {
                Ok(()) => println!(
                    "Audit log verified: {} event(s), hash chain intact.",
                    events.len()
                ),
                Err(AuditError::ChainMismatch {
                    event_id,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at event {}:", event_id);
                    println!("  Expected chain_hash: {}", expected);
                    println!("  Actual chain_hash:   {}", actual);
                    println!();
                    println!("The audit log may have been tampered with.");
                    anyhow::bail!("Audit log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(key_path) = &config.audit.signing_key_path {
                let keys = Ed25519Signer::from_pkcs8_file(config.audit.key_ref(), key_path)?;
                let verified = verify_signatures(&events, &keys)?;
                println!(
                    "Signatures verified: {} of {} event(s) signed with '{}'.",
                    verified,
                    events.len(),
                    config.audit.key_ref()
                );
            }
        }

        AuditCommands::Tail { log, workflow, n } => {
            let path = log.clone().unwrap_or_else(|| config.audit.log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let events: Vec<_> = JsonlAuditSink::read_all(&path)?
                .into_iter()
                .filter(|e| workflow.as_ref().map_or(true, |w| &e.workflow_id == w))
                .collect();
            let start = events.len().saturating_sub(*n);
            let recent = &events[start..];

            if recent.is_empty() {
                println!("No audit events.");
                return Ok(());
            }

            println!(
                "{:<20} {:<16} {:<9} {:<20} MESSAGE",
                "TIMESTAMP", "EVENT", "SEVERITY", "TYPE"
            );
            println!("{}", "-".repeat(100));

            for event in recent {
                println!(
                    "{:<20} {:<16} {:<9} {:<20} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    short_event_id(&event.event_id),
                    event.severity.to_string(),
                    event.event_type,
                    event.message,
                );
            }
        }
    }

    Ok(())
}

// Keeps the workflow suffix and sequence so rows stay narrow.
fn short_event_id(event_id: &str) -> &str {
    let len = event_id.len();
    event_id.get(len.saturating_sub(16)..).unwrap_or(event_id)
}
