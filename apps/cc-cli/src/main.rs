//! # cc-cli
//!
//! Command-line interface for CabinCrew.
//!
//! Drives governed workflows and inspects their durable record:
//! - `cabincrew workflow start/list/status/cancel/recover` — workflow lifecycle
//! - `cabincrew workflow begin-plan/submit-plan/preflight/submit-takeoff` — step results
//! - `cabincrew approval request/respond/list` — human approval gates
//! - `cabincrew wal show/verify` — inspect the write-ahead log
//! - `cabincrew audit verify/tail` — inspect the hash-chained audit trail

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cc_orchestrator::OrchestratorConfig;
use tracing_subscriber::EnvFilter;

/// CabinCrew CLI — governed flight-plan, pre-flight and take-off for agent actions.
#[derive(Parser)]
#[command(name = "cabincrew", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workflows.
    Workflow {
        #[command(subcommand)]
        command: commands::workflow::WorkflowCommands,
    },
    /// Request and answer human approvals.
    Approval {
        #[command(subcommand)]
        command: commands::approval::ApprovalCommands,
    },
    /// Inspect the write-ahead log.
    Wal {
        #[command(subcommand)]
        command: commands::wal::WalCommands,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = OrchestratorConfig::load(&project_root)?;

    match &cli.command {
        Commands::Workflow { command } => commands::workflow::execute(command, &config),
        Commands::Approval { command } => commands::approval::execute(command, &config),
        Commands::Wal { command } => commands::wal::execute(command, &config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
    }
}

// Logs go to stderr so stdout stays clean for tables and JSON.
fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("cc_orchestrator=info".parse()?)
        .add_directive("cabincrew=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
