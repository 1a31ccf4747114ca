use anyhow::Result;
use clap::Parser;

use nexus_orchestrator::cli::commands::{doctor, serve, status, tracking, watch, workflow_ops};
use nexus_orchestrator::cli::{Cli, Commands};
use nexus_orchestrator::{init_config, init_telemetry, shutdown_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_config() {
        eprintln!("Warning: failed to initialize configuration: {e}");
    }
    if let Err(e) = init_telemetry() {
        eprintln!("Warning: failed to initialize telemetry: {e}");
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { webhook_addr } => serve::run(webhook_addr).await,
        Commands::Status => status::status().await,
        Commands::Active => status::active().await,
        Commands::Track { project, issue, owner } => tracking::track(project, issue, owner).await,
        Commands::Tracked => tracking::tracked().await,
        Commands::Untrack { project, issue } => tracking::untrack(project, issue).await,
        Commands::Myissues { user } => tracking::myissues(user).await,
        Commands::Chat { project, message } => workflow_ops::chat(project, message).await,
        Commands::Pause { issue, reason } => workflow_ops::pause(issue, reason).await,
        Commands::Resume { issue } => workflow_ops::resume(issue).await,
        Commands::Stop { issue } => workflow_ops::stop(issue).await,
        Commands::Continue {
            issue,
            project,
            repo,
            workspace,
        } => workflow_ops::continue_issue(issue, project, repo, workspace).await,
        Commands::Agents => workflow_ops::agents().await,
        Commands::Visualize { issue } => workflow_ops::visualize(issue).await,
        Commands::Watch { project, issue, mermaid } => watch::watch(project, issue, mermaid).await,
        Commands::Doctor => doctor::doctor().await,
    };

    if let Err(err) = &result {
        eprintln!("error: {err:#}");
    }

    shutdown_telemetry();
    result
}
