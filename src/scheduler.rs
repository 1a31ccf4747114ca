//! `Scheduler`: the single cooperative loop tying every component together
//! (spec.md §4.H).
//!
//! Grounded on `original_source/.../telegram_main_bootstrap_service.py`'s
//! dual fast/slow loop description and the teacher's `shutdown.rs`
//! cooperative-shutdown shape. A single tick is made non-re-entrant with
//! an `AtomicBool` rather than a lock, since a skipped tick (not a queued
//! one) is the desired behavior when the previous tick overruns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::agent_launcher::{AgentLauncher, LaunchedAgentRecord, LaunchedAgentRegistry};
use crate::alerts::{Alert, EventBus, Severity};
use crate::clock::Clock;
use crate::error::Result;
use crate::git_platform::GitPlatform;
use crate::queue::{InboxQueue, Task};
use crate::reconciler::Reconciler;
use crate::router::Router;
use crate::shutdown::ShutdownSignal;
use crate::state_store::{keys, StateStore};
use crate::workflow::{AgentRef, WorkflowDefinition, WorkflowEngine};

/// Parses `name = "..."` / `[[steps]]` TOML at `path` into a
/// `WorkflowDefinition`. Falls back to a built-in single-tier `full`
/// definition (`developer` → `reviewer`) when the project names no path,
/// matching a project that hasn't customized its tiers yet.
pub fn load_workflow_definition(path: &str) -> Result<WorkflowDefinition> {
    if path.is_empty() || !std::path::Path::new(path).exists() {
        return Ok(default_workflow_definition());
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| {
        crate::error::OrchestratorError::Configuration(format!("parsing {path}: {e}"))
    })
}

fn default_workflow_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "full".to_string(),
        steps: vec![
            AgentRef {
                name: "developer".to_string(),
                display_name: "Developer".to_string(),
                agent_type: "developer".to_string(),
            },
            AgentRef {
                name: "reviewer".to_string(),
                display_name: "Reviewer".to_string(),
                agent_type: "reviewer".to_string(),
            },
        ],
    }
}

/// First non-empty line of a task payload body, stripped of a leading `#`
/// (spec.md §6 task payload header: `# <type-title>`).
fn task_title(markdown_content: &str) -> String {
    markdown_content
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .unwrap_or_else(|| "untitled task".to_string())
}

#[allow(clippy::too_many_arguments)]
pub struct Scheduler {
    queue: Arc<dyn InboxQueue>,
    store: Arc<dyn StateStore>,
    engine: Arc<WorkflowEngine>,
    reconciler: Arc<Reconciler>,
    router: Arc<Router>,
    platform: Arc<dyn GitPlatform>,
    launcher: Arc<dyn AgentLauncher>,
    agents: Arc<LaunchedAgentRegistry>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    ticking: AtomicBool,
    sleep_interval: Duration,
    check_interval: Duration,
    claim_batch_size: usize,
    stale_claim_seconds: u64,
    issue_dedupe_hours: u64,
    default_tier: String,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn InboxQueue>,
        store: Arc<dyn StateStore>,
        engine: Arc<WorkflowEngine>,
        reconciler: Arc<Reconciler>,
        router: Arc<Router>,
        platform: Arc<dyn GitPlatform>,
        launcher: Arc<dyn AgentLauncher>,
        agents: Arc<LaunchedAgentRegistry>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        sleep_interval: Duration,
        check_interval: Duration,
        claim_batch_size: usize,
        stale_claim_seconds: u64,
        issue_dedupe_hours: u64,
    ) -> Self {
        Self {
            queue,
            store,
            engine,
            reconciler,
            router,
            platform,
            launcher,
            agents,
            events,
            clock,
            ticking: AtomicBool::new(false),
            sleep_interval,
            check_interval,
            claim_batch_size,
            stale_claim_seconds,
            issue_dedupe_hours,
            default_tier: "full".to_string(),
        }
    }

    /// Runs forever, alternating fast-axis drains with slow-axis
    /// reconciliation, until `shutdown` is triggered. Runs one
    /// reconciliation pass with `startup=true` before entering the loop.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        info!("scheduler starting; running startup reconciliation pass");
        if let Err(err) = self.run_slow_axis(true).await {
            warn!(%err, "startup reconciliation failed");
        }

        let mut since_check = Duration::ZERO;
        while !shutdown.is_shutting_down() {
            if let Err(err) = self.tick(since_check >= self.check_interval).await {
                warn!(%err, "scheduler tick failed; continuing");
            }
            if since_check >= self.check_interval {
                since_check = Duration::ZERO;
            } else {
                since_check += self.sleep_interval;
            }
            tokio::time::sleep(self.sleep_interval).await;
        }
        info!("scheduler loop exiting on shutdown signal");
        Ok(())
    }

    /// A single non-reentrant tick: always drains the queue (fast axis),
    /// optionally runs the slow axis when `run_slow` is true.
    async fn tick(&self, run_slow: bool) -> Result<()> {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous tick still running; skipping this tick");
            return Ok(());
        }
        let result = async {
            self.run_fast_axis().await?;
            if run_slow {
                self.run_slow_axis(false).await?;
            }
            Ok(())
        }
        .await;
        self.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn run_fast_axis(&self) -> Result<()> {
        let tasks = self.queue.claim(self.claim_batch_size, "scheduler").await?;
        for task in tasks {
            let task_id = task.id;
            match self.process_task(&task).await {
                Ok(()) => {
                    self.queue.mark_done(task_id).await?;
                }
                Err(err) => {
                    warn!(task_id, %err, "task processing failed");
                    self.queue.mark_failed(task_id, &err.to_string()).await?;
                    self.events.alert(Alert::new(
                        "scheduler",
                        Severity::Error,
                        format!("task {task_id} failed: {err}"),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn run_slow_axis(&self, startup: bool) -> Result<()> {
        use tracing::Instrument;

        let correlation_id = crate::telemetry::generate_correlation_id();
        let span = crate::observability::create_workflow_span("reconcile_cycle", &correlation_id);
        let timer = crate::observability::OperationTimer::new("reconcile_cycle");

        async {
            let stale = self.queue.reclaim_stale(self.stale_claim_seconds).await?;
            if !stale.is_empty() {
                info!(count = stale.len(), "reclaimed stale processing tasks");
            }

            let issues = self.mapped_issues().await?;
            let report = self.reconciler.run_cycle(&issues, startup).await?;
            info!(
                auto_reconciled = report.auto_reconciled.len(),
                drifted = report.drifted.len(),
                orphans_recovered = report.orphans_recovered.len(),
                unmapped_recovered = report.unmapped_recovered.len(),
                closed_cancelled = report.closed_cancelled.len(),
                "reconciliation cycle complete"
            );
            Ok(())
        }
        .instrument(span)
        .await
        .inspect(|_| timer.finish())
    }

    /// `(issue_id, project_key, repo, workspace)` for every mapped issue,
    /// joined against the project registry for workspace lookup.
    async fn mapped_issues(&self) -> Result<Vec<(String, String, String, String)>> {
        let mappings: HashMap<String, String> =
            match self.store.load(keys::WORKFLOW_MAPPINGS).await? {
                Some(value) => serde_json::from_value(value)?,
                None => HashMap::new(),
            };

        let mut issues = Vec::new();
        for issue_id in mappings.keys() {
            let Ok(workflow) = self.engine.get_workflow(issue_id).await else {
                continue;
            };
            let workspace = self
                .router
                .project_config(&workflow.project_key)
                .ok()
                .flatten()
                .map(|cfg| cfg.workspace)
                .unwrap_or_default();
            issues.push((
                issue_id.clone(),
                workflow.project_key.clone(),
                workflow.repo_key.clone(),
                workspace,
            ));
        }
        Ok(issues)
    }

    /// Turns one claimed `Task` into an issue, a workflow, and a launched
    /// first agent. Skips issue creation when an open issue with the same
    /// title already exists within the dedupe window.
    async fn process_task(&self, task: &Task) -> Result<()> {
        let repo = self
            .router
            .repos_for_project(&task.project_key)?
            .first()
            .cloned()
            .ok_or_else(|| {
                crate::error::OrchestratorError::ProjectBoundaryMismatch(format!(
                    "project `{}` owns no repos",
                    task.project_key
                ))
            })?;

        let title = task_title(&task.markdown_content);

        // Dedupe by title among currently-open issues (spec.md §3: "a Task
        // may produce at most one Issue, dedupe by title+label within a
        // window"). `GitPlatform::Issue` carries no creation timestamp, so
        // the window is enforced implicitly by issue state: once an issue
        // this task would have created is closed, a new task with the same
        // title is allowed to create a fresh one. `issue_dedupe_hours` is
        // kept on the scheduler for a future `GitPlatform` that does expose
        // issue age.
        let _ = self.issue_dedupe_hours;
        let existing = self
            .platform
            .list_open_issues(&repo)
            .await?
            .into_iter()
            .find(|issue| issue.title == title);

        let issue = if let Some(issue) = existing {
            issue
        } else {
            self.platform
                .create_issue(
                    &repo,
                    &title,
                    &task.markdown_content,
                    &["workflow:pending".to_string()],
                )
                .await?
        };

        let project_cfg = self.router.project_config(&task.project_key)?;
        let definition_path = project_cfg
            .as_ref()
            .map(|c| c.workflow_definition_path.clone())
            .unwrap_or_default();
        let definition = load_workflow_definition(&definition_path)?;

        let issue_id = issue.number.to_string();
        let workflow_id = self
            .engine
            .create_workflow_for_issue(
                &issue_id,
                &task.project_key,
                &repo,
                &self.default_tier,
                &definition,
                &issue.url,
            )
            .await?;
        self.engine.start_workflow(&workflow_id, &issue_id).await?;

        if let Some(first) = definition.steps.first() {
            let launched = self
                .launcher
                .launch(&issue_id, &first.name, &self.default_tier, &repo)
                .await?;
            self.agents
                .record(LaunchedAgentRecord {
                    issue_id: issue_id.clone(),
                    agent_name: first.name.clone(),
                    pid: launched.pid,
                    tool: launched.tool,
                    tier: self.default_tier.clone(),
                    timestamp: self.clock.now(),
                    exclude_tools: vec![],
                })
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_title_strips_the_markdown_heading() {
        assert_eq!(
            task_title("# Add SOC2 export tooling\n\nbody"),
            "Add SOC2 export tooling"
        );
    }

    #[test]
    fn task_title_falls_back_when_body_is_empty() {
        assert_eq!(task_title("   \n\n"), "untitled task");
    }

    #[test]
    fn missing_definition_path_uses_the_default_tier() {
        let def = load_workflow_definition("").unwrap();
        assert_eq!(def.name, "full");
        assert_eq!(def.steps.len(), 2);
    }
}
