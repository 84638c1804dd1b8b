// workflow.rs — Workflow subcommands: lifecycle, step results, queries.

use std::path::PathBuf;

use clap::Subcommand;
use cc_orchestrator::{OrchestratorConfig, Workflow};
use cc_policy::PolicyEvaluation;
use cc_protocol::hasher::hash_file;
use cc_protocol::EngineOutput;
use cc_wal::{ArtifactCreated, PlanInputs};

use super::{open, parse_pairs, read_json};

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Start a new workflow.
    Start {
        /// Workflow ID (a UUID is generated when omitted).
        #[arg(long)]
        id: Option<String>,
        /// Metadata as key=value (repeatable).
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// List all workflows in the WAL.
    List,
    /// Show details of a workflow.
    Status {
        workflow_id: String,
        /// Print the full workflow as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Cancel a running workflow.
    Cancel {
        workflow_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Rebuild every workflow from the WAL and resume interrupted transitions.
    Recover,
    /// Start a flight-plan step.
    BeginPlan { workflow_id: String, step_id: String },
    /// Print the engine input for a pending flight-plan step.
    PlanInput {
        workflow_id: String,
        step_id: String,
        /// Engine config as key=value (repeatable).
        #[arg(long = "config")]
        config: Vec<String>,
        /// Engine context as key=value (repeatable).
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Record a flight-plan engine output and mint the plan token.
    SubmitPlan {
        workflow_id: String,
        step_id: String,
        /// Engine output JSON file.
        #[arg(long)]
        output: PathBuf,
        /// Hash of the workspace the plan was computed against.
        #[arg(long)]
        workspace_hash: String,
        /// Model that produced the plan.
        #[arg(long)]
        model: String,
        #[arg(long)]
        governance_hash: Option<String>,
        #[arg(long)]
        policy_digest: Option<String>,
    },
    /// Start a pre-flight step.
    BeginPreflight { workflow_id: String, step_id: String },
    /// Submit a batch of policy evaluations for a pre-flight step.
    Preflight {
        workflow_id: String,
        step_id: String,
        /// JSON file holding an array of policy evaluations.
        #[arg(long)]
        evaluations: PathBuf,
    },
    /// Start a take-off step.
    BeginTakeoff { workflow_id: String, step_id: String },
    /// Print the engine input for a pending take-off step.
    TakeoffInput {
        workflow_id: String,
        step_id: String,
        #[arg(long = "config")]
        config: Vec<String>,
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Record a take-off engine output and verify it against the plan token.
    SubmitTakeoff {
        workflow_id: String,
        step_id: String,
        /// Engine output JSON file.
        #[arg(long)]
        output: PathBuf,
    },
    /// Track an auxiliary artifact produced by a step.
    RecordArtifact {
        workflow_id: String,
        artifact_id: String,
        /// SHA-256 of the artifact content.
        #[arg(long, required_unless_present = "file", conflicts_with = "file")]
        hash: Option<String>,
        /// Hash this file instead of passing --hash.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "type")]
        artifact_type: String,
        #[arg(long)]
        step: Option<String>,
    },
}

pub fn execute(cmd: &WorkflowCommands, config: &OrchestratorConfig) -> anyhow::Result<()> {
    let orch = open(config)?;

    match cmd {
        WorkflowCommands::Start { id, meta } => {
            let workflow = orch.start_workflow(id.clone(), parse_pairs(meta)?)?;
            println!("Started workflow {}", workflow.workflow_id);
            println!("  State: {}", workflow.state);
        }

        WorkflowCommands::List => {
            let summaries = orch.list();
            let quarantined = orch.quarantined();
            if summaries.is_empty() && quarantined.is_empty() {
                println!("No workflows.");
                return Ok(());
            }

            println!(
                "{:<38} {:<22} {:>5} {:<18} UPDATED",
                "ID", "STATE", "SEQ", "PLAN TOKEN"
            );
            println!("{}", "-".repeat(100));
            for s in &summaries {
                println!(
                    "{:<38} {:<22} {:>5} {:<18} {}",
                    s.workflow_id,
                    s.state.to_string(),
                    s.last_sequence,
                    s.plan_token_hash.as_deref().map(short).unwrap_or("-"),
                    s.updated_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
            for q in &quarantined {
                println!(
                    "{:<38} {:<22} {:>5} {:<18} {}",
                    q.workflow_id,
                    format!("quarantined:{}", q.kind),
                    "-",
                    "-",
                    q.reason
                );
            }
            println!("\n{} workflow(s), {} quarantined.", summaries.len(), quarantined.len());
        }

        WorkflowCommands::Status { workflow_id, json } => {
            let workflow = orch.snapshot(workflow_id)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&workflow)?);
            } else {
                print_status(&workflow);
            }
        }

        WorkflowCommands::Cancel {
            workflow_id,
            reason,
        } => {
            let workflow = orch.cancel(workflow_id, reason)?;
            println!("Cancelled workflow {} ({})", workflow.workflow_id, workflow.state);
        }

        WorkflowCommands::Recover => {
            // `open` has already run recovery.
            let summaries = orch.list();
            let active = summaries.iter().filter(|s| !s.state.is_terminal()).count();
            println!(
                "Recovered {} workflow(s): {} active, {} terminal, {} quarantined.",
                summaries.len(),
                active,
                summaries.len() - active,
                orch.quarantined().len()
            );
        }

        WorkflowCommands::BeginPlan {
            workflow_id,
            step_id,
        } => {
            let workflow = orch.begin_flight_plan(workflow_id, step_id)?;
            println!("Flight-plan step '{}' started ({})", step_id, workflow.state);
        }

        WorkflowCommands::PlanInput {
            workflow_id,
            step_id,
            config: engine_config,
            context,
        } => {
            let input = orch.flight_plan_input(
                workflow_id,
                step_id,
                parse_pairs(engine_config)?,
                parse_pairs(context)?,
            )?;
            println!("{}", serde_json::to_string_pretty(&input)?);
        }

        WorkflowCommands::SubmitPlan {
            workflow_id,
            step_id,
            output,
            workspace_hash,
            model,
            governance_hash,
            policy_digest,
        } => {
            let output: EngineOutput = read_json(output)?;
            let mut inputs = PlanInputs::new(workspace_hash, model);
            inputs.governance_hash = governance_hash.clone();
            inputs.policy_digest = policy_digest.clone();

            let workflow = orch.submit_flight_plan(workflow_id, step_id, &output, inputs)?;
            report_outcome(&workflow);
            if let Some(token) = &workflow.plan_token_hash {
                println!("  Plan token: {}", token);
            }
        }

        WorkflowCommands::BeginPreflight {
            workflow_id,
            step_id,
        } => {
            let workflow = orch.begin_preflight(workflow_id, step_id)?;
            println!("Pre-flight step '{}' started ({})", step_id, workflow.state);
        }

        WorkflowCommands::Preflight {
            workflow_id,
            step_id,
            evaluations,
        } => {
            let evaluations: Vec<PolicyEvaluation> = read_json(evaluations)?;
            let (aggregated, workflow) =
                orch.submit_policy_evaluations(workflow_id, step_id, evaluations)?;
            println!(
                "Decision: {} ({}, {} evaluation(s))",
                aggregated.decision,
                aggregated.method,
                aggregated.evaluations.len()
            );
            if let Some(policy) = &aggregated.deciding_policy {
                println!("  Deciding policy: {}", policy);
            }
            report_outcome(&workflow);
        }

        WorkflowCommands::BeginTakeoff {
            workflow_id,
            step_id,
        } => {
            let workflow = orch.begin_takeoff(workflow_id, step_id)?;
            println!("Take-off step '{}' started ({})", step_id, workflow.state);
        }

        WorkflowCommands::TakeoffInput {
            workflow_id,
            step_id,
            config: engine_config,
            context,
        } => {
            let input = orch.takeoff_input(
                workflow_id,
                step_id,
                parse_pairs(engine_config)?,
                parse_pairs(context)?,
            )?;
            println!("{}", serde_json::to_string_pretty(&input)?);
        }

        WorkflowCommands::SubmitTakeoff {
            workflow_id,
            step_id,
            output,
        } => {
            let output: EngineOutput = read_json(output)?;
            let workflow = orch.submit_takeoff(workflow_id, step_id, &output)?;
            report_outcome(&workflow);
        }

        WorkflowCommands::RecordArtifact {
            workflow_id,
            artifact_id,
            hash,
            file,
            artifact_type,
            step,
        } => {
            let artifact_hash = match (hash, file) {
                (Some(hash), _) => hash.clone(),
                (None, Some(path)) => hash_file(path)?,
                (None, None) => anyhow::bail!("either --hash or --file is required"),
            };
            let artifact = ArtifactCreated {
                artifact_id: artifact_id.clone(),
                artifact_hash,
                artifact_type: artifact_type.clone(),
                step_id: step.clone(),
                plan_token: None,
            };
            let artifact_hash = artifact.artifact_hash.clone();
            orch.record_artifact(workflow_id, artifact)?;
            println!("Recorded artifact '{}' ({})", artifact_id, short(&artifact_hash));
        }
    }

    Ok(())
}

fn report_outcome(workflow: &Workflow) {
    println!("Workflow {} is now {}", workflow.workflow_id, workflow.state);
    if let Some(failure) = &workflow.failure {
        println!("  Failure: {}: {}", failure.kind, failure.message);
        for detail in &failure.details {
            println!("    {}", detail);
        }
    }
}

fn print_status(workflow: &Workflow) {
    println!("Workflow:    {}", workflow.workflow_id);
    println!("State:       {}", workflow.state);
    println!("Sequence:    {}", workflow.last_sequence);
    if let Some(created) = workflow.created_at {
        println!("Created:     {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(token) = &workflow.plan_token_hash {
        println!("Plan token:  {}", token);
    }
    if let Some(decision) = workflow.last_decision {
        println!("Decision:    {}", decision);
    }
    for (step, step_type) in &workflow.steps_pending {
        println!("Pending:     {} ({})", step, step_type);
    }
    for approval in workflow.pending_approvals.values() {
        println!(
            "Approval:    {} awaiting role '{}'",
            approval.approval_id, approval.required_role
        );
    }
    if let Some(failure) = &workflow.failure {
        println!("Failure:     {}: {}", failure.kind, failure.message);
        for detail in &failure.details {
            println!("             {}", detail);
        }
    }

    println!();
    println!("{:<6} {:<24} AT", "SEQ", "STATE");
    println!("{}", "-".repeat(60));
    for change in &workflow.history {
        println!(
            "{:<6} {:<24} {}",
            change.sequence,
            change.state.to_string(),
            change.at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
