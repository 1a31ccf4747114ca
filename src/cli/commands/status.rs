//! `status` / `active`: overview of tracked issues and workflow states.
//!
//! Grounded on the teacher's `cli/commands/status.rs` report-formatting
//! shape, rebuilt against `WorkflowEngine::list_tracked_issue_ids` +
//! `get_workflow_status` instead of a GitHub-label-based `AgentRouter`.

use anyhow::Result;

use crate::cli::context::Context;
use crate::workflow::WorkflowState;

pub async fn status() -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let issue_ids = ctx.engine.list_tracked_issue_ids().await?;

    println!("nexus-orchestrator status");
    println!("=========================");
    println!("tracked workflows: {}", issue_ids.len());
    println!();

    let mut by_state: std::collections::BTreeMap<&'static str, u32> = std::collections::BTreeMap::new();
    for issue_id in &issue_ids {
        let Ok(status) = ctx.engine.get_workflow_status(issue_id).await else {
            continue;
        };
        *by_state.entry(state_label(status.state)).or_insert(0) += 1;
        println!(
            "  issue {issue_id:<8} [{}] step {}/{} ({})",
            state_label(status.state),
            status.current_step_num,
            status.total_steps,
            status.current_step_name.unwrap_or_else(|| "-".to_string()),
        );
    }

    println!();
    println!("by state:");
    for (state, count) in by_state {
        println!("  {state:<10} {count}");
    }
    Ok(())
}

pub async fn active() -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let issue_ids = ctx.engine.list_tracked_issue_ids().await?;

    println!("active workflows:");
    let mut any = false;
    for issue_id in &issue_ids {
        let Ok(workflow) = ctx.engine.get_workflow(issue_id).await else {
            continue;
        };
        if workflow.state.is_terminal() {
            continue;
        }
        any = true;
        println!(
            "  issue {:<8} project {:<16} repo {:<24} [{}]",
            workflow.issue_id,
            workflow.project_key,
            workflow.repo_key,
            state_label(workflow.state),
        );
    }
    if !any {
        println!("  (none)");
    }
    Ok(())
}

fn state_label(state: WorkflowState) -> &'static str {
    match state {
        WorkflowState::Pending => "pending",
        WorkflowState::Running => "running",
        WorkflowState::Paused => "paused",
        WorkflowState::Completed => "completed",
        WorkflowState::Failed => "failed",
        WorkflowState::Cancelled => "cancelled",
        WorkflowState::Stopped => "stopped",
    }
}
