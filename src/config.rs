//! Layered configuration: defaults < config file < `NEXUS_*` environment.
//!
//! Grounded on the teacher's `config.rs` (`config` + `dotenvy`, same
//! `LazyLock`-backed global accessor pair). Fields cover spec.md §6's
//! environment inputs plus the per-component tunables named throughout
//! §4 (`STALE_CLAIM_SECONDS`, `ORPHAN_RECOVERY_COOLDOWN_SECONDS`,
//! `COMPLETION_REPLAY_WINDOW_SECONDS`, `NEXUS_ISSUE_DEDUPE_HOURS`).

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NexusConfig {
    pub github: GitHubConfig,
    pub observability: ObservabilityConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub workflow: WorkflowConfig,
    pub reconciler: ReconcilerConfig,
    pub webhook: WebhookConfig,
    pub scheduler: SchedulerConfig,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    /// GitHub API token (can be set via env var).
    pub token: Option<String>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub requests_per_hour: u32,
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub tracing_enabled: bool,
    pub otlp_endpoint: Option<String>,
    pub log_level: String,
    pub metrics_enabled: bool,
}

/// `StateStore`/`InboxQueue`/workflow-mapping backend selection (spec.md §6:
/// `NEXUS_STORAGE_BACKEND`, `NEXUS_INBOX_BACKEND`, `NEXUS_WORKFLOW_BACKEND`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Filesystem,
    Relational,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub base_dir: String,
    pub runtime_dir: String,
    pub logs_dir: String,
    pub project_config_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub backend: Option<BackendKind>,
    pub stale_claim_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub backend: Option<BackendKind>,
    pub terminal_agents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    pub orphan_recovery_cooldown_seconds: u64,
    pub completion_replay_window_seconds: u64,
    pub retry_guard_max_attempts: u32,
    pub retry_guard_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub bot_author: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub sleep_interval_seconds: u64,
    pub check_interval_seconds: u64,
    pub claim_batch_size: usize,
    pub issue_dedupe_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub auto_migrate: bool,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            github: GitHubConfig {
                token: None,
                rate_limit: RateLimitConfig {
                    requests_per_hour: 5000,
                    burst_capacity: 100,
                },
            },
            observability: ObservabilityConfig {
                tracing_enabled: true,
                otlp_endpoint: None,
                log_level: "info".to_string(),
                metrics_enabled: true,
            },
            storage: StorageConfig {
                backend: BackendKind::Filesystem,
                base_dir: ".".to_string(),
                runtime_dir: ".nexus".to_string(),
                logs_dir: ".nexus/logs".to_string(),
                project_config_path: ".nexus/projects.toml".to_string(),
            },
            queue: QueueConfig {
                backend: None,
                stale_claim_seconds: 600, // STALE_CLAIM_SECONDS default: 10 minutes
            },
            workflow: WorkflowConfig {
                backend: None,
                terminal_agents: vec![
                    "".to_string(),
                    "done".to_string(),
                    "complete".to_string(),
                    "reviewer-complete".to_string(),
                ],
            },
            reconciler: ReconcilerConfig {
                orphan_recovery_cooldown_seconds: 300,
                completion_replay_window_seconds: 1800,
                retry_guard_max_attempts: 3,
                retry_guard_window_seconds: 900,
            },
            webhook: WebhookConfig {
                secret: None,
                bot_author: "nexus-bot".to_string(),
            },
            scheduler: SchedulerConfig {
                sleep_interval_seconds: 5,
                check_interval_seconds: 60,
                claim_batch_size: 10,
                issue_dedupe_hours: 24,
            },
            database: Some(DatabaseConfig {
                url: ".nexus/nexus.db".to_string(),
                max_connections: 10,
                auto_migrate: true,
            }),
        }
    }
}

impl NexusConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. `nexus.toml` / `.nexus-rc` configuration files
    /// 3. Environment variables (prefixed with `NEXUS_`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("nexus.toml").exists() {
            builder = builder.add_source(File::with_name("nexus"));
        }
        if Path::new(".nexus-rc").exists() {
            builder = builder.add_source(File::with_name(".nexus-rc"));
        }

        builder = builder.add_source(
            Environment::with_prefix("NEXUS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut nexus_config: NexusConfig = config.try_deserialize()?;

        if nexus_config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                nexus_config.github.token = Some(token);
            } else if let Ok(token) = std::env::var("NEXUS_GITHUB_TOKEN") {
                nexus_config.github.token = Some(token);
            }
        }
        if let Ok(base_dir) = std::env::var("BASE_DIR") {
            nexus_config.storage.base_dir = base_dir;
        }
        if let Ok(runtime_dir) = std::env::var("NEXUS_RUNTIME_DIR") {
            nexus_config.storage.runtime_dir = runtime_dir;
        }
        if let Ok(logs_dir) = std::env::var("LOGS_DIR") {
            nexus_config.storage.logs_dir = logs_dir;
        }
        if let Ok(path) = std::env::var("PROJECT_CONFIG_PATH") {
            nexus_config.storage.project_config_path = path;
        }
        if let Ok(seconds) = std::env::var("NEXUS_COMPLETION_REPLAY_WINDOW_SECONDS") {
            if let Ok(seconds) = seconds.parse() {
                nexus_config.reconciler.completion_replay_window_seconds = seconds;
            }
        }
        if let Ok(hours) = std::env::var("NEXUS_ISSUE_DEDUPE_HOURS") {
            if let Ok(hours) = hours.parse() {
                nexus_config.scheduler.issue_dedupe_hours = hours;
            }
        }

        Ok(nexus_config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance, re-read only when the process restarts —
/// matching spec.md §5's "process-wide caches ... initialized once at
/// startup; invalidation is triggered by a path-change token". The token
/// lives on `ProjectRegistry` (see `router.rs`), not here: the static
/// process config rarely changes at runtime, but project definitions do.
static CONFIG: std::sync::LazyLock<Result<NexusConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = NexusConfig::load_env_file();
        NexusConfig::load()
    });

pub fn config() -> Result<&'static NexusConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = NexusConfig::default();
        assert_eq!(cfg.queue.stale_claim_seconds, 600);
        assert_eq!(cfg.reconciler.completion_replay_window_seconds, 1800);
        assert_eq!(cfg.scheduler.issue_dedupe_hours, 24);
        assert!(cfg
            .workflow
            .terminal_agents
            .iter()
            .any(|a| a == "reviewer-complete"));
    }
}
