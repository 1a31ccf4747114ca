//! spec.md §4.J: PR-merge notification is gated by the repo's effective
//! review policy, but worktree cleanup runs for every referenced issue
//! regardless of that gate (`original_source/.../test_webhook_pr_service.py`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use git2::{Repository, Signature};
use nexus_orchestrator::agent_launcher::LaunchedAgentRegistry;
use nexus_orchestrator::alerts::EventBus;
use nexus_orchestrator::clock::FixedClock;
use nexus_orchestrator::git_platform::{Comment, GitPlatform, Issue, PullRequest};
use nexus_orchestrator::router::{ProjectRegistry, Router};
use nexus_orchestrator::state_store::FilesystemStateStore;
use nexus_orchestrator::webhook::WebhookRouter;
use nexus_orchestrator::workflow::WorkflowEngine;
use nexus_orchestrator::{AgentLauncher, IdempotencyLedger, LaunchedAgent, StateStore};

struct StubPlatform;

#[async_trait]
impl GitPlatform for StubPlatform {
    async fn create_issue(&self, _repo: &str, _title: &str, _body: &str, _labels: &[String]) -> nexus_orchestrator::Result<Issue> {
        unimplemented!()
    }
    async fn close_issue(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<()> {
        unimplemented!()
    }
    async fn get_issue(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Option<Issue>> {
        unimplemented!()
    }
    async fn list_open_issues(&self, _repo: &str) -> nexus_orchestrator::Result<Vec<Issue>> {
        Ok(vec![])
    }
    async fn get_comments(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Vec<Comment>> {
        Ok(vec![])
    }
    async fn add_comment(&self, _repo: &str, _issue_number: u64, _body: &str) -> nexus_orchestrator::Result<Comment> {
        unimplemented!()
    }
    async fn update_labels(&self, _repo: &str, _issue_number: u64, _labels: &[String]) -> nexus_orchestrator::Result<()> {
        unimplemented!()
    }
    async fn search_linked_prs(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Vec<PullRequest>> {
        Ok(vec![])
    }
}

struct NoopLauncher;

#[async_trait]
impl AgentLauncher for NoopLauncher {
    async fn launch(&self, issue_id: &str, agent_type: &str, _tier: &str, _repo: &str) -> nexus_orchestrator::Result<LaunchedAgent> {
        Ok(LaunchedAgent {
            pid: 1,
            tool: "claude-code".to_string(),
            issue_id: issue_id.to_string(),
            agent_type: agent_type.to_string(),
        })
    }
}

/// Builds a bare repo under `<base>/<workspace>/<repo_name>` with a
/// registered worktree named `issue-<issue>`, so `cleanup_worktree_for_issue`
/// has something real to prune.
fn repo_with_worktree(base: &std::path::Path, workspace: &str, repo_name: &str, issue: u64) {
    let repo_dir = base.join(workspace).join(repo_name);
    std::fs::create_dir_all(&repo_dir).unwrap();
    let repo = Repository::init(&repo_dir).unwrap();
    let signature = Signature::now("Test", "test@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &signature, &signature, "init", &tree, &[]).unwrap();
    let worktree_path = base.join(workspace).join(format!("issue-{issue}-worktree"));
    repo.worktree(&format!("issue-{issue}"), &worktree_path, None).unwrap();
}

async fn build_router(dir: &std::path::Path, projects_toml: &str) -> WebhookRouter {
    std::fs::write(dir.join("projects.toml"), projects_toml).unwrap();
    let registry = ProjectRegistry::load(dir.join("projects.toml")).unwrap();
    let router = Arc::new(Router::new(registry, dir));

    let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir));
    let ledger = Arc::new(IdempotencyLedger::load(store.clone()).await.unwrap());
    let clock: Arc<dyn nexus_orchestrator::Clock> = Arc::new(FixedClock::new(Utc::now()));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        ledger,
        EventBus::default(),
        clock.clone(),
        ["".to_string(), "done".to_string()].into_iter().collect(),
    ));
    let agents = Arc::new(LaunchedAgentRegistry::new(store.clone()));

    WebhookRouter::new(
        router,
        engine,
        Arc::new(StubPlatform),
        Arc::new(NoopLauncher),
        agents,
        EventBus::default(),
        clock,
        None,
        "nexus-bot".to_string(),
    )
}

fn merged_pr_body(title: &str) -> Vec<u8> {
    serde_json::json!({
        "action": "closed",
        "pull_request": {
            "number": 9,
            "title": title,
            "body": "",
            "merged": true,
            "html_url": "https://example.com/pr/9"
        },
        "repository": { "full_name": "acme/widgets" }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn manual_review_mode_skips_notification_but_still_cleans_worktrees() {
    let dir = tempfile::TempDir::new().unwrap();
    repo_with_worktree(dir.path(), "nexus-workspace", "widgets", 42);

    let webhook = build_router(
        dir.path(),
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/widgets"]
review_mode = "manual"
"#,
    )
    .await;

    let response = webhook
        .handle(None, Some("pull_request"), None, &merged_pr_body("Close #42"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["status"], "pr_merged_skipped_manual_review");
    assert_eq!(response.body["cleaned_issue_refs"], serde_json::json!(["42"]));
}

#[tokio::test]
async fn auto_review_mode_notifies_and_cleans_worktrees() {
    let dir = tempfile::TempDir::new().unwrap();
    repo_with_worktree(dir.path(), "nexus-workspace", "widgets", 42);

    let webhook = build_router(
        dir.path(),
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/widgets"]
review_mode = "auto"
"#,
    )
    .await;

    let response = webhook
        .handle(None, Some("pull_request"), None, &merged_pr_body("Close #42"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["status"], "pr_merged_notified");
    assert_eq!(response.body["cleaned_issue_refs"], serde_json::json!(["42"]));
}

#[tokio::test]
async fn unreferenced_issue_yields_no_cleanup() {
    let dir = tempfile::TempDir::new().unwrap();

    let webhook = build_router(
        dir.path(),
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/widgets"]
review_mode = "auto"
"#,
    )
    .await;

    let response = webhook
        .handle(None, Some("pull_request"), None, &merged_pr_body("no issue reference"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["cleaned_issue_refs"], serde_json::json!([]));
}
