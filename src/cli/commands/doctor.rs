//! `doctor`: configuration, project registry, and storage health checks
//! (spec.md §2.5/§4.M; DESIGN.md's "environment/config diagnostics").
//!
//! Grounded on the shape of the teacher's `cli/commands/doctor/*`
//! diagnostics (one check per concern, pass/warn/fail reported together)
//! but narrowed to what this system's collaborators actually are: config
//! load, project registry load, `StateStore` round-trip, GitHub token
//! presence, webhook secret presence.

use anyhow::Result;
use serde_json::json;

use crate::config::NexusConfig;
use crate::router::ProjectRegistry;
use crate::state_store::{FilesystemStateStore, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    fn symbol(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
        }
    }
}

struct Check {
    name: &'static str,
    status: Status,
    detail: String,
}

pub async fn doctor() -> Result<()> {
    let mut checks = Vec::new();

    let config = match NexusConfig::load() {
        Ok(config) => {
            checks.push(Check {
                name: "configuration",
                status: Status::Pass,
                detail: format!("backend={:?}", config.storage.backend),
            });
            Some(config)
        }
        Err(err) => {
            checks.push(Check {
                name: "configuration",
                status: Status::Fail,
                detail: err.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        match ProjectRegistry::load(&config.storage.project_config_path) {
            Ok(registry) => match registry.all() {
                Ok(projects) => checks.push(Check {
                    name: "project registry",
                    status: if projects.is_empty() { Status::Warn } else { Status::Pass },
                    detail: format!("{} project(s) configured", projects.len()),
                }),
                Err(err) => checks.push(Check {
                    name: "project registry",
                    status: Status::Fail,
                    detail: err.to_string(),
                }),
            },
            Err(err) => checks.push(Check {
                name: "project registry",
                status: Status::Fail,
                detail: err.to_string(),
            }),
        }

        let store = FilesystemStateStore::new(&config.storage.runtime_dir);
        let round_trip: crate::error::Result<()> = async {
            store.save("doctor_healthcheck", json!({"ok": true})).await?;
            store.load("doctor_healthcheck").await?;
            Ok(())
        }
        .await;
        match round_trip {
            Ok(()) => checks.push(Check {
                name: "state store round-trip",
                status: Status::Pass,
                detail: config.storage.runtime_dir.clone(),
            }),
            Err(err) => checks.push(Check {
                name: "state store round-trip",
                status: Status::Fail,
                detail: err.to_string(),
            }),
        }

        checks.push(Check {
            name: "github token",
            status: if config.github.token.is_some() { Status::Pass } else { Status::Warn },
            detail: if config.github.token.is_some() {
                "present".to_string()
            } else {
                "not set; GitPlatform calls will fail".to_string()
            },
        });

        checks.push(Check {
            name: "webhook secret",
            status: if config.webhook.secret.is_some() { Status::Pass } else { Status::Warn },
            detail: if config.webhook.secret.is_some() {
                "present".to_string()
            } else {
                "not set; signature verification disabled".to_string()
            },
        });
    }

    println!("nexus-orchestrator doctor");
    println!("=========================");
    let mut worst = Status::Pass;
    for check in &checks {
        println!("[{}] {:<24} {}", check.status.symbol(), check.name, check.detail);
        if check.status == Status::Fail {
            worst = Status::Fail;
        } else if check.status == Status::Warn && worst != Status::Fail {
            worst = Status::Warn;
        }
    }
    println!();
    match worst {
        Status::Pass => println!("all checks passed"),
        Status::Warn => println!("some checks need attention"),
        Status::Fail => println!("one or more checks failed"),
    }
    Ok(())
}
