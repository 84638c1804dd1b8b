// wal.rs — WAL subcommands: show, verify.

use std::sync::Arc;

use clap::Subcommand;
use cc_orchestrator::OrchestratorConfig;
use cc_wal::{FileWalStorage, WriteAheadLog};

#[derive(Subcommand)]
pub enum WalCommands {
    /// Show the entries recorded for a workflow.
    Show {
        workflow_id: String,
        /// Print each entry as a JSON line.
        #[arg(long)]
        json: bool,
    },
    /// Check checksums and sequence continuity of every workflow log.
    Verify,
}

pub fn execute(cmd: &WalCommands, config: &OrchestratorConfig) -> anyhow::Result<()> {
    if !config.wal.dir.exists() {
        println!("No WAL found at {}", config.wal.dir.display());
        return Ok(());
    }
    let wal = WriteAheadLog::new(Arc::new(FileWalStorage::open(&config.wal.dir)?));

    match cmd {
        WalCommands::Show { workflow_id, json } => {
            let entries = wal.read_all(workflow_id)?;
            if entries.is_empty() {
                println!("No WAL entries for workflow {}.", workflow_id);
                return Ok(());
            }

            if *json {
                for entry in &entries {
                    println!("{}", serde_json::to_string(&entry.to_record()?)?);
                }
                return Ok(());
            }

            println!("{:<6} {:<22} {:<20} CHECKSUM", "SEQ", "TYPE", "TIMESTAMP");
            println!("{}", "-".repeat(80));
            for entry in &entries {
                println!(
                    "{:<6} {:<22} {:<20} {}",
                    entry.sequence,
                    entry.entry_type().as_str(),
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.checksum.get(..16).unwrap_or(&entry.checksum),
                );
            }
            println!("\n{} entry(ies).", entries.len());
        }

        WalCommands::Verify => {
            let workflows = wal.workflows()?;
            let mut failures = 0;
            for workflow_id in &workflows {
                let mut count = 0u64;
                let mut error = None;
                for entry in wal.replay(workflow_id)? {
                    match entry {
                        Ok(_) => count += 1,
                        Err(e) => {
                            error = Some(e);
                            break;
                        }
                    }
                }
                match error {
                    None => println!("{:<38} ok ({} entries)", workflow_id, count),
                    Some(e) => {
                        failures += 1;
                        println!("{:<38} FAILED after {} entries: {}", workflow_id, count, e);
                    }
                }
            }

            if failures > 0 {
                println!();
                println!("The WAL may have been tampered with.");
                anyhow::bail!("{} of {} workflow log(s) failed verification", failures, workflows.len());
            }
            println!("\nWAL verified: {} workflow log(s) intact.", workflows.len());
        }
    }

    Ok(())
}
