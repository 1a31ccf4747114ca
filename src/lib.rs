// nexus-orchestrator — GitHub-issue-driven multi-agent workflow orchestration.
// This exposes the core components for testing and integration.

pub mod agent_launcher;
pub mod alerts;
pub mod clock;
pub mod cli;
pub mod command_contract;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod feature_registry;
pub mod fs;
pub mod git;
pub mod git_platform;
pub mod http;
pub mod idempotency;
pub mod observability;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod shutdown;
pub mod state_store;
pub mod telemetry;
pub mod watch;
pub mod webhook;
pub mod workflow;

// Re-export key types for easy access
pub use agent_launcher::{AgentLauncher, LaunchedAgent, LaunchedAgentRegistry, ProcessAgentLauncher};
pub use alerts::{Alert, EventBus, LifecycleEvent, Severity};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{config, init_config, NexusConfig};
pub use error::{OrchestratorError, Result};
pub use feature_registry::FeatureRegistry;
pub use fs::{FileSystemOperations, StandardFileSystem};
pub use git::{Git2Operations, GitOperations, RepoSlug};
pub use git_platform::{GitHubPlatform, GitPlatform, Issue, IssueState};
pub use http::RateLimitedHttpClient;
pub use idempotency::{IdempotencyKey, IdempotencyLedger};
pub use queue::{InboxQueue, Task, TaskStatus};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::{BackoffConfig, RetryGuard};
pub use router::{ProjectConfig, ProjectRegistry, Router};
pub use scheduler::Scheduler;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use state_store::StateStore;
pub use telemetry::{init_telemetry, shutdown_telemetry};
pub use watch::WatchService;
pub use webhook::WebhookRouter;
pub use workflow::{Workflow, WorkflowDefinition, WorkflowEngine, WorkflowState};
