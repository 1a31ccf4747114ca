//! spec.md §4.G step 6: a completion file whose issue has no workflow
//! mapping, but whose `next_agent` is non-terminal, launches that agent
//! ("completion-scan"). Exercises `Reconciler::recover_unmapped_issues`
//! end to end, proving the unmapped set is derived from the full
//! `workflow_mappings` document rather than the caller's already-mapped
//! `issues` slice (which would make every completion file "mapped" by
//! construction).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use nexus_orchestrator::git_platform::{Comment, GitPlatform, Issue, PullRequest};
use nexus_orchestrator::state_store::FilesystemStateStore;
use nexus_orchestrator::workflow::{AgentRef, WorkflowDefinition, WorkflowEngine};
use nexus_orchestrator::{
    AgentLauncher, Clock, EventBus, FeatureRegistry, FixedClock, IdempotencyLedger,
    LaunchedAgent, LaunchedAgentRegistry, ProjectRegistry, Reconciler, RetryGuard, Router,
    StateStore,
};

struct StubPlatform;

#[async_trait]
impl GitPlatform for StubPlatform {
    async fn create_issue(&self, _repo: &str, _title: &str, _body: &str, _labels: &[String]) -> nexus_orchestrator::Result<Issue> {
        unimplemented!("not exercised by this test")
    }

    async fn close_issue(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<()> {
        unimplemented!("not exercised by this test")
    }

    async fn get_issue(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Option<Issue>> {
        unimplemented!("not exercised by this test")
    }

    async fn list_open_issues(&self, _repo: &str) -> nexus_orchestrator::Result<Vec<Issue>> {
        Ok(vec![])
    }

    async fn get_comments(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Vec<Comment>> {
        Ok(vec![])
    }

    async fn add_comment(&self, _repo: &str, _issue_number: u64, _body: &str) -> nexus_orchestrator::Result<Comment> {
        unimplemented!("not exercised by this test")
    }

    async fn update_labels(&self, _repo: &str, _issue_number: u64, _labels: &[String]) -> nexus_orchestrator::Result<()> {
        unimplemented!("not exercised by this test")
    }

    async fn search_linked_prs(&self, _repo: &str, _issue_number: u64) -> nexus_orchestrator::Result<Vec<PullRequest>> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<(String, String, String, String)>>,
}

#[async_trait]
impl AgentLauncher for RecordingLauncher {
    async fn launch(&self, issue_id: &str, agent_type: &str, tier: &str, repo: &str) -> nexus_orchestrator::Result<LaunchedAgent> {
        self.launched.lock().unwrap().push((
            issue_id.to_string(),
            agent_type.to_string(),
            tier.to_string(),
            repo.to_string(),
        ));
        Ok(LaunchedAgent {
            pid: 4242,
            tool: "claude-code".to_string(),
            issue_id: issue_id.to_string(),
            agent_type: agent_type.to_string(),
        })
    }
}

fn definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "standard".to_string(),
        steps: vec![AgentRef {
            name: "developer".to_string(),
            display_name: "Developer".to_string(),
            agent_type: "developer".to_string(),
        }],
    }
}

#[tokio::test]
async fn unmapped_completion_file_launches_its_next_agent() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir.path()));
    let ledger = Arc::new(IdempotencyLedger::load(store.clone()).await.unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        ledger,
        EventBus::default(),
        clock.clone(),
        ["".to_string(), "done".to_string()].into_iter().collect(),
    ));

    // A second, *mapped* workflow exists, proving mapped issues are left
    // alone by the unmapped-recovery pass.
    let workflow_id = engine
        .create_workflow_for_issue("1", "nexus", "acme/widgets", "standard", &definition(), "https://example.com/1")
        .await
        .unwrap();
    engine.start_workflow(&workflow_id, "1").await.unwrap();

    let projects_path = dir.path().join("projects.toml");
    std::fs::write(
        &projects_path,
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/widgets"]
"#,
    )
    .unwrap();
    let registry = ProjectRegistry::load(&projects_path).unwrap();
    let router = Arc::new(Router::new(registry, dir.path()));

    // Issue 91 has a completion file but no workflow mapping.
    let completions_dir = dir
        .path()
        .join("nexus-workspace/.nexus/tasks/nexus/completions");
    std::fs::create_dir_all(&completions_dir).unwrap();
    std::fs::write(
        completions_dir.join("completion_summary_91.json"),
        r#"{"status":"complete","agent_type":"developer","summary":"done","key_findings":[],"next_agent":"reviewer"}"#,
    )
    .unwrap();
    // Issue 1 (already mapped) also has a stray completion file naming a
    // non-terminal next agent; it must NOT be launched again.
    std::fs::write(
        completions_dir.join("completion_summary_1.json"),
        r#"{"status":"complete","agent_type":"developer","summary":"done","key_findings":[],"next_agent":"reviewer"}"#,
    )
    .unwrap();

    let platform = Arc::new(StubPlatform);
    let launcher = Arc::new(RecordingLauncher::default());
    let agents = Arc::new(LaunchedAgentRegistry::new(store.clone()));
    let retry_guard = Arc::new(RetryGuard::new(clock.clone(), 3, 3600));
    let feature_registry = Arc::new(FeatureRegistry::new(store.clone(), 50));

    let reconciler = Reconciler::new(
        engine,
        platform,
        launcher.clone(),
        agents,
        router,
        retry_guard,
        clock,
        EventBus::default(),
        dir.path(),
        300,
        86_400,
        feature_registry,
    );

    // No mapped issues passed in this cycle at all: the unmapped sweep
    // must still find issue 91 on its own.
    let report = reconciler.run_cycle(&[], false).await.unwrap();

    assert_eq!(report.unmapped_recovered, vec!["91".to_string()]);
    let launched = launcher.launched.lock().unwrap();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0], (
        "91".to_string(),
        "reviewer".to_string(),
        "completion-scan".to_string(),
        "acme/widgets".to_string(),
    ));
}
