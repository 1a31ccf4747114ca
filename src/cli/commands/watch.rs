//! `watch`: streams workflow events for one issue until interrupted
//! (spec.md §4.L `WatchService`).

use anyhow::{Context as _, Result};
use tracing::info;

use crate::cli::context::Context;
use crate::watch::WatchNotification;

pub async fn watch(project: String, issue: String, mermaid: bool) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let project_key = ctx.router.normalize_project_key(&project)?;
    let issue_num: u64 = issue.parse().context("issue must be numeric")?;

    let workflow = ctx.engine.get_workflow(&issue).await?;
    let key = format!("cli:{issue_num}");

    let mut rx = ctx
        .watch
        .subscribe(&key, &project_key, issue_num, &workflow.workflow_id, mermaid)
        .await?;

    println!("watching issue #{issue_num} in project `{project_key}` (Ctrl-C to stop)");

    let watch_service = ctx.watch.clone();
    tokio::select! {
        _ = async {
            while let Some(notification) = rx.recv().await {
                print_notification(&notification);
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("watch interrupted");
        }
    }

    watch_service.unsubscribe(&key).await?;
    Ok(())
}

fn print_notification(notification: &WatchNotification) {
    match notification {
        WatchNotification::StepStatusChanged {
            step_num,
            step_name,
            status,
        } => println!("  step {step_num} ({step_name}): {status}"),
        WatchNotification::WorkflowCompleted => println!("  workflow completed"),
        WatchNotification::MermaidDiagram { diagram } => println!("{diagram}"),
    }
}
