//! `track` / `tracked` / `untrack` / `myissues`: the `tracked_issues`
//! persisted document (spec.md §6), exposed outside the normal
//! inbox→workflow flow for issues an operator wants to track manually.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::context::Context;
use crate::state_store::keys;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub project: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub owner: Option<String>,
}

async fn load_tracked(ctx: &Context) -> Result<HashMap<String, TrackedIssue>> {
    match ctx.store.load(keys::TRACKED_ISSUES).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(HashMap::new()),
    }
}

async fn save_tracked(ctx: &Context, tracked: &HashMap<String, TrackedIssue>) -> Result<()> {
    ctx.store
        .save(keys::TRACKED_ISSUES, serde_json::to_value(tracked)?)
        .await?;
    Ok(())
}

pub async fn track(project: String, issue: u64, owner: Option<String>) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let project_key = ctx.router.normalize_project_key(&project)?;

    let repo = ctx
        .router
        .repos_for_project(&project_key)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("project `{project_key}` owns no repos"))?;

    let description = match ctx.platform.get_issue(&repo, issue).await? {
        Some(found) => found.title,
        None => format!("issue #{issue}"),
    };

    let mut tracked = load_tracked(&ctx).await?;
    tracked.insert(
        issue.to_string(),
        TrackedIssue {
            project: project_key,
            description,
            created_at: ctx.clock.now(),
            status: "tracked".to_string(),
            owner,
        },
    );
    save_tracked(&ctx, &tracked).await?;
    println!("tracking issue #{issue}");
    Ok(())
}

pub async fn tracked() -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let tracked = load_tracked(&ctx).await?;

    if tracked.is_empty() {
        println!("no tracked issues");
        return Ok(());
    }
    for (issue, record) in &tracked {
        println!(
            "  #{issue:<8} [{}] {} - {}",
            record.status, record.project, record.description
        );
    }
    Ok(())
}

pub async fn untrack(project: String, issue: u64) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let project_key = ctx.router.normalize_project_key(&project)?;

    let mut tracked = load_tracked(&ctx).await?;
    match tracked.get(&issue.to_string()) {
        Some(record) if record.project == project_key => {
            tracked.remove(&issue.to_string());
            save_tracked(&ctx, &tracked).await?;
            println!("untracked issue #{issue}");
        }
        Some(_) => println!("issue #{issue} is tracked under a different project"),
        None => println!("issue #{issue} is not tracked"),
    }
    Ok(())
}

pub async fn myissues(user: String) -> Result<()> {
    let ctx = Context::bootstrap().await?;
    let tracked = load_tracked(&ctx).await?;

    let mut any = false;
    for (issue, record) in &tracked {
        if record.owner.as_deref() == Some(user.as_str()) {
            any = true;
            println!("  #{issue:<8} [{}] {} - {}", record.status, record.project, record.description);
        }
    }
    if !any {
        println!("no tracked issues owned by {user}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_issue_round_trips_through_json() {
        let record = TrackedIssue {
            project: "nexus".to_string(),
            description: "Add SOC2 export tooling".to_string(),
            created_at: Utc::now(),
            status: "tracked".to_string(),
            owner: Some("alice".to_string()),
        };
        let value = serde_json::to_value(&record).unwrap();
        let back: TrackedIssue = serde_json::from_value(value).unwrap();
        assert_eq!(back.project, record.project);
        assert_eq!(back.owner, record.owner);
    }
}
