// approval.rs — Approval subcommands: request, respond, list.

use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;
use cc_orchestrator::{Orchestrator, OrchestratorConfig};
use cc_protocol::{ApprovalRequest, ApprovalResponse, PreflightEvidence};

use super::{open, read_json};

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// Request human approval for the current plan token.
    Request {
        workflow_id: String,
        step_id: String,
        /// Role an approver must hold.
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "pre-flight requires approval")]
        reason: String,
        /// JSON file holding an array of evidence entries.
        #[arg(long)]
        evidence: Option<PathBuf>,
    },
    /// Approve or reject a pending request.
    Respond {
        approval_id: String,
        /// Identity of the approver.
        #[arg(long)]
        approver: String,
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
        /// Plan token the approver reviewed (defaults to the one on the request).
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List pending approval requests.
    List,
}

pub fn execute(cmd: &ApprovalCommands, config: &OrchestratorConfig) -> anyhow::Result<()> {
    let orch = open(config)?;

    match cmd {
        ApprovalCommands::Request {
            workflow_id,
            step_id,
            role,
            reason,
            evidence,
        } => {
            let evidence: Vec<PreflightEvidence> = match evidence {
                Some(path) => read_json(path)?,
                None => Vec::new(),
            };
            let request = orch.request_approval(workflow_id, step_id, role, reason, evidence)?;
            println!("Approval requested: {}", request.approval_id);
            println!("  Role:       {}", request.required_role);
            println!("  Plan token: {}", request.plan_token_hash);
        }

        ApprovalCommands::Respond {
            approval_id,
            approver,
            approve,
            reject: _,
            token,
            reason,
        } => {
            let plan_token_hash = match token {
                Some(t) => t.clone(),
                None => match find_request(&orch, approval_id)? {
                    Some(request) => request.plan_token_hash,
                    None => anyhow::bail!("No pending approval '{}'", approval_id),
                },
            };
            let response = ApprovalResponse {
                approval_id: approval_id.clone(),
                approved: *approve,
                approver: approver.clone(),
                plan_token_hash,
                reason: reason.clone(),
                timestamp: Some(Utc::now()),
            };
            let workflow = orch.submit_approval(&response)?;
            println!(
                "Approval {} {} by {}; workflow {} is now {}",
                approval_id,
                if *approve { "granted" } else { "rejected" },
                approver,
                workflow.workflow_id,
                workflow.state
            );
        }

        ApprovalCommands::List => {
            let pending = pending_requests(&orch)?;
            if pending.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }

            println!(
                "{:<38} {:<38} {:<14} {:<18} REASON",
                "APPROVAL", "WORKFLOW", "ROLE", "PLAN TOKEN"
            );
            println!("{}", "-".repeat(120));
            for request in &pending {
                println!(
                    "{:<38} {:<38} {:<14} {:<18} {}",
                    request.approval_id,
                    request.workflow_id,
                    request.required_role,
                    request
                        .plan_token_hash
                        .get(..16)
                        .unwrap_or(&request.plan_token_hash),
                    request.reason
                );
            }
            println!("\n{} pending approval(s).", pending.len());
        }
    }

    Ok(())
}

fn pending_requests(orch: &Orchestrator) -> anyhow::Result<Vec<ApprovalRequest>> {
    let mut pending = Vec::new();
    for summary in orch.list() {
        if summary.state.is_terminal() {
            continue;
        }
        let workflow = orch.snapshot(&summary.workflow_id)?;
        pending.extend(workflow.pending_approvals.into_values());
    }
    Ok(pending)
}

fn find_request(orch: &Orchestrator, approval_id: &str) -> anyhow::Result<Option<ApprovalRequest>> {
    Ok(pending_requests(orch)?
        .into_iter()
        .find(|r| r.approval_id == approval_id))
}
