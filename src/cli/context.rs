//! Shared bootstrap for every CLI command: builds the same collaborator
//! graph `main.rs` wires for `serve`, minus the scheduler loop itself.
//! Grounded on the teacher's `cli/commands/mod.rs::with_agent_router`
//! (one connect-and-report bootstrap shared by every subcommand).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};

use crate::agent_launcher::{AgentLauncher, LaunchedAgentRegistry, ProcessAgentLauncher};
use crate::alerts::EventBus;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, NexusConfig};
use crate::feature_registry::FeatureRegistry;
use crate::git_platform::{GitHubPlatform, GitPlatform};
use crate::http::RateLimitedHttpClient;
use crate::idempotency::IdempotencyLedger;
use crate::queue::InboxQueue;
use crate::reconciler::Reconciler;
use crate::retry::RetryGuard;
use crate::router::{ProjectRegistry, Router};
use crate::state_store::StateStore;
use crate::watch::WatchService;
use crate::workflow::WorkflowEngine;

pub struct Context {
    pub config: NexusConfig,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn InboxQueue>,
    pub router: Arc<Router>,
    pub engine: Arc<WorkflowEngine>,
    pub platform: Arc<dyn GitPlatform>,
    pub launcher: Arc<dyn AgentLauncher>,
    pub agents: Arc<LaunchedAgentRegistry>,
    pub reconciler: Arc<Reconciler>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub watch: Arc<WatchService>,
    pub feature_registry: Arc<FeatureRegistry>,
}

async fn build_state_store(config: &NexusConfig) -> Result<Arc<dyn StateStore>> {
    match config.storage.backend {
        BackendKind::Filesystem => Ok(Arc::new(crate::state_store::FilesystemStateStore::new(
            &config.storage.runtime_dir,
        ))),
        BackendKind::Relational => {
            #[cfg(feature = "database")]
            {
                let db = config
                    .database
                    .as_ref()
                    .ok_or_else(|| anyhow!("storage.backend=relational requires [database]"))?;
                let pool = crate::database::connect(&db.url, db.auto_migrate).await?;
                Ok(Arc::new(crate::state_store::RelationalStateStore::new(pool)))
            }
            #[cfg(not(feature = "database"))]
            {
                Err(anyhow!("storage.backend=relational requires the `database` feature"))
            }
        }
    }
}

async fn build_inbox_queue(config: &NexusConfig, store: Arc<dyn StateStore>) -> Result<Arc<dyn InboxQueue>> {
    let backend = config.queue.backend.unwrap_or(config.storage.backend);
    match backend {
        BackendKind::Filesystem => Ok(Arc::new(crate::queue::FilesystemInboxQueue::new(store))),
        BackendKind::Relational => {
            #[cfg(feature = "database")]
            {
                let db = config
                    .database
                    .as_ref()
                    .ok_or_else(|| anyhow!("queue.backend=relational requires [database]"))?;
                let pool = crate::database::connect(&db.url, db.auto_migrate).await?;
                Ok(Arc::new(crate::queue::RelationalInboxQueue::new(pool)))
            }
            #[cfg(not(feature = "database"))]
            {
                Err(anyhow!("queue.backend=relational requires the `database` feature"))
            }
        }
    }
}

impl Context {
    pub async fn bootstrap() -> Result<Self> {
        let config = NexusConfig::load().context("loading configuration")?;

        let store = build_state_store(&config).await?;
        let queue = build_inbox_queue(&config, store.clone()).await?;

        let registry = ProjectRegistry::load(&config.storage.project_config_path)
            .context("loading project registry")?;
        let router = Arc::new(Router::new(registry, &config.storage.base_dir));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = EventBus::default();

        let ledger = Arc::new(IdempotencyLedger::load(store.clone()).await?);
        let terminal_agents: HashSet<String> = config.workflow.terminal_agents.iter().cloned().collect();
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            ledger,
            events.clone(),
            clock.clone(),
            terminal_agents,
        ));

        let token = config.github.token.clone().unwrap_or_default();
        let requests_per_second = (config.github.rate_limit.requests_per_hour / 3600).max(1);
        let http_client = RateLimitedHttpClient::new(
            token,
            requests_per_second,
            config.github.rate_limit.burst_capacity,
        )
        .map_err(|e| anyhow!("building GitHub client: {e}"))?;
        let platform: Arc<dyn GitPlatform> = Arc::new(GitHubPlatform::new(http_client));

        let launcher: Arc<dyn AgentLauncher> = Arc::new(ProcessAgentLauncher::default());
        let agents = Arc::new(LaunchedAgentRegistry::new(store.clone()));

        let retry_guard = Arc::new(RetryGuard::new(
            clock.clone(),
            config.reconciler.retry_guard_max_attempts,
            config.reconciler.retry_guard_window_seconds,
        ));

        let feature_registry = Arc::new(FeatureRegistry::new(store.clone(), 200));

        let reconciler = Arc::new(Reconciler::new(
            engine.clone(),
            platform.clone(),
            launcher.clone(),
            agents.clone(),
            router.clone(),
            retry_guard,
            clock.clone(),
            events.clone(),
            &config.storage.base_dir,
            config.reconciler.orphan_recovery_cooldown_seconds,
            config.reconciler.completion_replay_window_seconds,
            feature_registry.clone(),
        ));

        let watch = Arc::new(WatchService::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            Duration::from_secs(2),
        ));

        Ok(Self {
            config,
            store,
            queue,
            router,
            engine,
            platform,
            launcher,
            agents,
            reconciler,
            events,
            clock,
            watch,
            feature_registry,
        })
    }
}
