//! `chat` / `pause` / `resume` / `stop` / `continue` / `agents` /
//! `visualize`: the per-workflow operator commands (spec.md §4.M).
//!
//! Grounded on the teacher's per-command-struct `cli/commands/*.rs` shape,
//! each retargeted at a single `WorkflowEngine`/`Reconciler` call instead
//! of the teacher's GitHub-label agent assignment.

use anyhow::{anyhow, Result};

use crate::cli::context::Context;
use crate::watch::build_mermaid_diagram;

/// Enqueues a free-text task for `project` (spec.md §6 task payload).
pub async fn chat(project: String, message: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let project_key = ctx.router.normalize_project_key(&project)?;
    let config = ctx
        .router
        .project_config(&project_key)?
        .ok_or_else(|| anyhow!("unknown project `{project_key}`"))?;

    let slug = slugify(&message);
    let filename = format!("task_{}.md", ctx.clock.now().timestamp());
    let body = format!(
        "# {title}\n**Project:** {project_key}\n**Type:** chat\n**Task Name:** {slug}\n**Status:** Pending\n\n{message}\n\n---\n**Raw Input:**\n{message}\n",
        title = message.lines().next().unwrap_or(&message),
    );

    let task_id = ctx
        .queue
        .enqueue(&project_key, &config.workspace, &filename, &body)
        .await?;
    println!("enqueued task {task_id} for project `{project_key}`");
    Ok(())
}

fn slugify(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

pub async fn pause(issue: String, reason: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    ctx.engine.pause_workflow(&issue, &reason).await?;
    println!("paused workflow for issue {issue} ({reason})");
    Ok(())
}

pub async fn resume(issue: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    ctx.engine.resume_workflow(&issue).await?;
    println!("resumed workflow for issue {issue}");
    Ok(())
}

pub async fn stop(issue: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    ctx.engine.stop_workflow(&issue).await?;
    println!("stopped workflow for issue {issue}");
    Ok(())
}

/// Nudges the reconciler to re-check one issue immediately, outside its
/// normal per-tick scan (spec.md §4.G).
pub async fn continue_issue(issue: String, project: String, repo: String, workspace: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let project_key = ctx.router.normalize_project_key(&project)?;
    let issues = vec![(issue.clone(), project_key, repo, workspace)];
    let report = ctx.reconciler.run_cycle(&issues, false).await?;
    println!(
        "reconciliation done: auto_reconciled={} drifted={} orphans_recovered={} unmapped_recovered={} closed_cancelled={}",
        report.auto_reconciled.len(),
        report.drifted.len(),
        report.orphans_recovered.len(),
        report.unmapped_recovered.len(),
        report.closed_cancelled.len(),
    );
    Ok(())
}

pub async fn agents() -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let launched = ctx.agents.list_all().await?;
    if launched.is_empty() {
        println!("no agents currently launched");
        return Ok(());
    }
    for record in launched {
        println!(
            "  issue {:<8} agent {:<16} pid {:<8} tier {:<10} tool {}",
            record.issue_id, record.agent_name, record.pid, record.tier, record.tool
        );
    }
    Ok(())
}

pub async fn visualize(issue: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let workflow = ctx.engine.get_workflow(&issue).await?;
    println!("{}", build_mermaid_diagram(&workflow));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_trims_punctuation() {
        assert_eq!(slugify("Add SOC2 export tooling!"), "add-soc2-export-tooling");
    }

    #[test]
    fn slugify_caps_at_six_words() {
        let long = "one two three four five six seven eight";
        assert_eq!(slugify(long), "one-two-three-four-five-six");
    }
}
