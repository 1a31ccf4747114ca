//! `Reconciler`: orphan detection, drift resolution, replay (spec.md §4.G).
//!
//! Grounded on `original_source/.../workflow_recovery_service.py`
//! (`recover_orphaned_running_agents`, cooldown-gated retry-guard
//! consultation, closed-issue reconciliation) and
//! `.../inbox_routing_service.py` / the nexus-bot completion-scan tests
//! for the unmapped-issue replay path. One cycle runs per scheduler tick
//! and once at startup (spec.md §4.G).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent_launcher::{is_pid_alive, AgentLauncher, LaunchedAgentRecord, LaunchedAgentRegistry};
use crate::alerts::{Alert, EventBus, Severity};
use crate::clock::Clock;
use crate::error::Result;
use crate::feature_registry::FeatureRegistry;
use crate::git_platform::GitPlatform;
use crate::retry::RetryGuard;
use crate::router::Router;
use crate::workflow::{WorkflowEngine, WorkflowState};

/// §6 "Completion summary file" schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub status: String,
    pub agent_type: String,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub next_agent: String,
}

#[derive(Debug, Clone)]
pub(crate) struct StructuredComment {
    pub(crate) comment_id: u64,
    pub(crate) completed_agent: String,
    pub(crate) next_agent: String,
}

/// Parses a bot-authored comment of the shape shown in spec.md scenario 3:
/// `"## step complete — developer"` / `"ready for @reviewer"`. Shared with
/// `webhook::issue_comment_created`, which applies the same parsing to
/// live webhook deliveries instead of a reconciliation scan.
pub(crate) fn parse_structured_comment(comment_id: u64, body: &str) -> Option<StructuredComment> {
    let lower = body.to_lowercase();
    let completed_agent = lower
        .split("step complete")
        .nth(1)?
        .trim_start_matches([' ', '—', '-', ':'])
        .split_whitespace()
        .next()?
        .trim()
        .to_string();

    let next_agent = if let Some(rest) = lower.split("ready for @").nth(1) {
        rest.split_whitespace().next().unwrap_or("").trim_matches('`').to_string()
    } else if lower.contains("reviewer-complete") || lower.contains("workflow complete") {
        "".to_string()
    } else {
        return None;
    };

    Some(StructuredComment {
        comment_id,
        completed_agent,
        next_agent,
    })
}

/// Extracts `<issue>` from a `completion_summary_<issue>.json` filename
/// (spec.md §6).
fn issue_id_from_completion_path(path: &Path) -> Option<String> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("completion_summary_")
        .map(str::to_string)
}

/// A single issue's reconciliation outcome, surfaced for tests and
/// operator visibility (`nexus-orchestrator doctor`/`status`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub auto_reconciled: Vec<String>,
    pub drifted: Vec<String>,
    pub orphans_recovered: Vec<String>,
    pub unmapped_recovered: Vec<String>,
    pub closed_cancelled: Vec<String>,
}

pub struct Reconciler {
    engine: Arc<WorkflowEngine>,
    platform: Arc<dyn GitPlatform>,
    launcher: Arc<dyn AgentLauncher>,
    agents: Arc<LaunchedAgentRegistry>,
    router: Arc<Router>,
    retry_guard: Arc<RetryGuard>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    base_dir: PathBuf,
    orphan_recovery_cooldown_seconds: u64,
    completion_replay_window_seconds: u64,
    orphan_last_attempt: Mutex<HashMap<String, DateTime<Utc>>>,
    feature_registry: Arc<FeatureRegistry>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<WorkflowEngine>,
        platform: Arc<dyn GitPlatform>,
        launcher: Arc<dyn AgentLauncher>,
        agents: Arc<LaunchedAgentRegistry>,
        router: Arc<Router>,
        retry_guard: Arc<RetryGuard>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        base_dir: impl Into<PathBuf>,
        orphan_recovery_cooldown_seconds: u64,
        completion_replay_window_seconds: u64,
        feature_registry: Arc<FeatureRegistry>,
    ) -> Self {
        Self {
            engine,
            platform,
            launcher,
            agents,
            router,
            retry_guard,
            clock,
            events,
            base_dir: base_dir.into(),
            orphan_recovery_cooldown_seconds,
            completion_replay_window_seconds,
            orphan_last_attempt: Mutex::new(HashMap::new()),
            feature_registry,
        }
    }

    fn completions_dir(&self, project_key: &str, workspace: &str) -> PathBuf {
        self.base_dir
            .join(workspace)
            .join(".nexus/tasks")
            .join(project_key)
            .join("completions")
    }

    fn completion_file_path(&self, project_key: &str, workspace: &str, issue_id: &str) -> PathBuf {
        self.completions_dir(project_key, workspace)
            .join(format!("completion_summary_{issue_id}.json"))
    }

    fn read_completion_file(&self, path: &Path) -> Option<CompletionSummary> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn write_completion_file(&self, path: &Path, summary: &CompletionSummary) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(summary)?)?;
        Ok(())
    }

    async fn latest_structured_comment(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> Option<StructuredComment> {
        let comments = self.platform.get_comments(repo, issue_number).await.ok()?;
        comments
            .iter()
            .rev()
            .find_map(|c| parse_structured_comment(c.id, &c.body))
    }

    /// Runs one reconciliation cycle over every issue with a workflow
    /// mapping, plus unmapped-issue recovery from stray completion files.
    pub async fn run_cycle(
        &self,
        issues: &[(String, String, String, String)], // (issue_id, project_key, repo, workspace)
        startup: bool,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for (issue_id, project_key, repo, workspace) in issues {
            self.reconcile_issue(issue_id, project_key, repo, workspace, startup, &mut report)
                .await;
        }

        self.recover_unmapped_issues(&mut report).await;
        Ok(report)
    }

    /// Runs the same per-issue pass `run_cycle` does, for a single issue,
    /// without the unmapped-issue sweep. Grounds the CLI `continue`
    /// command: an operator-triggered nudge that re-checks one issue's
    /// drift/orphan/closed state immediately instead of waiting for the
    /// next scheduler tick.
    pub async fn reconcile_one(
        &self,
        issue_id: &str,
        project_key: &str,
        repo: &str,
        workspace: &str,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.reconcile_issue(issue_id, project_key, repo, workspace, false, &mut report)
            .await;
        report
    }

    async fn reconcile_issue(
        &self,
        issue_id: &str,
        project_key: &str,
        repo: &str,
        workspace: &str,
        startup: bool,
        report: &mut ReconcileReport,
    ) {
        let Ok(workflow) = self.engine.get_workflow(issue_id).await else {
            return;
        };

        // Step 1: skip terminal/paused workflows.
        if workflow.state.is_terminal() || workflow.state == WorkflowState::Paused {
            return;
        }

        // Step 2: identify the expected running agent.
        let Some(expected) = workflow.running_step().map(|s| s.agent.name.clone()) else {
            return;
        };

        let completion_path = self.completion_file_path(project_key, workspace, issue_id);
        let local_completion = self.read_completion_file(&completion_path);
        let remote_comment = self.latest_structured_comment(repo, issue_id.parse().unwrap_or(0)).await;

        // Step 3: startup auto-reconcile.
        if startup {
            if let Some(comment) = &remote_comment {
                let comment_next = comment.next_agent.clone();
                if comment.completed_agent == expected.to_lowercase()
                    && !comment_next.is_empty()
                    && comment_next != "done"
                    && comment_next != "complete"
                {
                    let event_id = format!("startup:{}", comment.comment_id);
                    let outputs = serde_json::json!({ "next_agent": comment_next });
                    if self
                        .engine
                        .complete_step(issue_id, &expected, outputs, &event_id)
                        .await
                        .is_ok()
                    {
                        let summary = CompletionSummary {
                            status: "complete".to_string(),
                            agent_type: expected.clone(),
                            summary: "startup auto-reconcile".to_string(),
                            key_findings: vec![],
                            next_agent: comment.next_agent.clone(),
                        };
                        let _ = self.write_completion_file(&completion_path, &summary);
                        let _ = self
                            .feature_registry
                            .ingest_completion(project_key, issue_id, &summary.status, &summary.key_findings)
                            .await;
                        report.auto_reconciled.push(issue_id.to_string());
                        return;
                    }
                }
            }
        }

        // Step 4: drift detection (advisory only).
        let local_next = local_completion.as_ref().map(|c| c.next_agent.clone());
        let comment_next = remote_comment.as_ref().map(|c| c.next_agent.clone());
        let drifted = match (&local_next, &comment_next) {
            (Some(local), Some(comment)) => local != &expected && comment != &expected,
            (Some(local), None) => local != &expected,
            (None, Some(comment)) => comment != &expected,
            (None, None) => false,
        } || (local_next.is_some() && comment_next.is_some() && local_next != comment_next);

        if drifted {
            self.events.alert(
                Alert::new(
                    "reconciler",
                    Severity::Warning,
                    format!(
                        "drift detected for issue {issue_id}: expected={expected} local={local_next:?} comment={comment_next:?}"
                    ),
                )
                .for_issue(project_key.to_string(), issue_id.parse().unwrap_or(0)),
            );
            report.drifted.push(issue_id.to_string());
        }

        // Step 5: orphan recovery.
        self.maybe_recover_orphan(issue_id, project_key, repo, &expected, report).await;

        // Step 7: closed-issue reconciliation.
        self.maybe_cancel_for_closed_issue(issue_id, project_key, repo, report).await;
    }

    async fn maybe_recover_orphan(
        &self,
        issue_id: &str,
        project_key: &str,
        repo: &str,
        expected_agent: &str,
        report: &mut ReconcileReport,
    ) {
        let launched = self.agents.latest_for_issue(issue_id).await.ok().flatten();
        let alive = launched.as_ref().map(|r| is_pid_alive(r.pid)).unwrap_or(false);
        if alive {
            return;
        }

        let Ok(Some(issue)) = self
            .platform
            .get_issue(repo, issue_id.parse().unwrap_or(0))
            .await
        else {
            return;
        };
        if issue.state != crate::git_platform::IssueState::Open {
            return;
        }

        let now = self.clock.now();
        {
            let mut attempts = self.orphan_last_attempt.lock().await;
            if let Some(last) = attempts.get(issue_id) {
                if (now - *last).num_seconds() < self.orphan_recovery_cooldown_seconds as i64 {
                    return;
                }
            }
            if !self.retry_guard.should_retry(issue_id).await {
                return;
            }
            attempts.insert(issue_id.to_string(), now);
        }

        if let Ok(launched) = self
            .launcher
            .launch(issue_id, expected_agent, "orphan-recovery", repo)
            .await
        {
            let _ = self
                .agents
                .record(LaunchedAgentRecord {
                    issue_id: issue_id.to_string(),
                    agent_name: expected_agent.to_string(),
                    pid: launched.pid,
                    tool: launched.tool,
                    tier: project_key.to_string(),
                    timestamp: now,
                    exclude_tools: vec![],
                })
                .await;
            report.orphans_recovered.push(issue_id.to_string());
        }
    }

    /// Step 6: launches an agent for completion files whose issue has no
    /// workflow mapping, ignoring anything older than the replay window.
    ///
    /// Scans every configured project's completions directory directly
    /// (via `Router`), rather than relying on the caller-supplied mapped-
    /// issue list: that list is exactly the set of issues with a
    /// `workflow_mappings` entry, so deriving "unmapped" from it would
    /// always be empty by construction. The authoritative mapped set comes
    /// straight from `WorkflowEngine::list_tracked_issue_ids` instead.
    async fn recover_unmapped_issues(&self, report: &mut ReconcileReport) {
        let mapped: std::collections::HashSet<String> = self
            .engine
            .list_tracked_issue_ids()
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let Ok(projects) = self.router.all_projects() else { return };
        for (project_key, cfg) in projects {
            let Ok(repos) = self.router.repos_for_project(&project_key) else { continue };
            let Some(repo) = repos.first().cloned() else { continue };

            let dir = self.completions_dir(&project_key, &cfg.workspace);
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(issue_id) = issue_id_from_completion_path(&path) else { continue };
                if mapped.contains(&issue_id) {
                    continue;
                }
                let Some(summary) = self.read_completion_file(&path) else { continue };
                if summary.next_agent.is_empty()
                    || summary.next_agent == "done"
                    || summary.next_agent == "complete"
                    || summary.next_agent == "reviewer-complete"
                {
                    continue;
                }
                let age_ok = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .map(|age| age.as_secs() <= self.completion_replay_window_seconds)
                    .unwrap_or(false);
                if !age_ok {
                    continue;
                }
                if let Ok(launched) = self
                    .launcher
                    .launch(&issue_id, &summary.next_agent, "completion-scan", &repo)
                    .await
                {
                    let _ = self
                        .agents
                        .record(LaunchedAgentRecord {
                            issue_id: issue_id.clone(),
                            agent_name: summary.next_agent.clone(),
                            pid: launched.pid,
                            tool: launched.tool,
                            tier: project_key.clone(),
                            timestamp: self.clock.now(),
                            exclude_tools: vec![],
                        })
                        .await;
                    let _ = self
                        .feature_registry
                        .ingest_completion(&project_key, &issue_id, &summary.status, &summary.key_findings)
                        .await;
                    report.unmapped_recovered.push(issue_id.clone());
                }
            }
        }
    }

    async fn maybe_cancel_for_closed_issue(
        &self,
        issue_id: &str,
        project_key: &str,
        repo: &str,
        report: &mut ReconcileReport,
    ) {
        let issue = self.platform.get_issue(repo, issue_id.parse().unwrap_or(0)).await.ok().flatten();
        let closed = match issue {
            Some(issue) => issue.state == crate::git_platform::IssueState::Closed,
            None => true,
        };
        if !closed {
            return;
        }
        if self.engine.cancel_workflow(issue_id).await.is_ok() {
            let _ = self
                .router
                .archive_task_files(project_key, issue_id.parse().unwrap_or(0));
            report.closed_cancelled.push(issue_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_scenario_3_comment_shape() {
        let comment = parse_structured_comment(
            111,
            "## step complete — developer\n\nready for @reviewer",
        )
        .unwrap();
        assert_eq!(comment.completed_agent, "developer");
        assert_eq!(comment.next_agent, "reviewer");
    }

    #[test]
    fn recognizes_a_terminal_completion_comment() {
        let comment = parse_structured_comment(5, "## step complete — reviewer\n\nreviewer-complete").unwrap();
        assert_eq!(comment.completed_agent, "reviewer");
        assert_eq!(comment.next_agent, "");
    }

    #[test]
    fn non_structured_comments_do_not_parse() {
        assert!(parse_structured_comment(1, "just a regular comment").is_none());
    }
}
