use clap::{Parser, Subcommand};

pub mod commands;
pub mod context;

#[derive(Parser)]
#[command(name = "nexus-orchestrator")]
#[command(about = "GitHub-issue-driven multi-agent workflow orchestration")]
#[command(long_about = "nexus-orchestrator drains a task inbox into GitHub issues, drives each issue \
                       through a fixed agent pipeline, and reconciles workflow state against GitHub \
                       when agents crash or webhooks are missed. Run 'nexus-orchestrator serve' to \
                       start the scheduler and webhook listener.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler loop and webhook listener until a shutdown signal arrives
    Serve {
        /// Address the webhook HTTP listener binds to
        #[arg(long, default_value = "0.0.0.0:8080")]
        webhook_addr: String,
    },
    /// Overview of tracked issues and workflow states
    Status,
    /// List workflows that are not yet terminal
    Active,
    /// Start tracking an issue outside of the normal inbox flow
    Track {
        project: String,
        issue: u64,
        #[arg(long)]
        owner: Option<String>,
    },
    /// List every tracked issue
    Tracked,
    /// Stop tracking an issue
    Untrack { project: String, issue: u64 },
    /// List tracked issues belonging to a user
    Myissues {
        #[arg(long)]
        user: String,
    },
    /// Enqueue a free-text task for a project
    Chat {
        project: String,
        message: String,
    },
    /// Freeze a running workflow
    Pause {
        issue: String,
        #[arg(long, default_value = "operator request")]
        reason: String,
    },
    /// Unfreeze a paused workflow
    Resume { issue: String },
    /// Stop a workflow
    Stop { issue: String },
    /// Nudge the reconciler to re-check one issue immediately
    Continue {
        issue: String,
        project: String,
        repo: String,
        #[arg(long, default_value = "")]
        workspace: String,
    },
    /// List currently launched agents
    Agents,
    /// Print a Mermaid diagram of one issue's workflow
    Visualize { issue: String },
    /// Stream workflow events for one issue until interrupted
    Watch {
        project: String,
        issue: String,
        #[arg(long, default_value_t = true)]
        mermaid: bool,
    },
    /// Check configuration, project registry, and storage health
    Doctor,
}
