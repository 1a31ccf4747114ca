//! `GitPlatform`: the external code-hosting collaborator (spec.md §4.B).
//!
//! A pure interface — implementations are collaborators the orchestration
//! core never constructs concrete API calls around directly. Grounded on
//! the teacher's `github/client.rs`/`issues.rs`/`comments.rs`/`pulls.rs`
//! call shapes, narrowed to the subset spec.md names: create/close issue,
//! list open issues, get/add comments, update labels, search linked PRs.

pub mod github;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub author: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub merged: bool,
    pub state: IssueState,
}

/// `repo` is always `"owner/name"`, letting one `GitPlatform` serve every
/// repo a project owns rather than pinning one at construction time
/// (spec.md §4.K: a workspace may contain multiple repos).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitPlatform: Send + Sync {
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue>;

    async fn close_issue(&self, repo: &str, issue_number: u64) -> Result<()>;

    async fn get_issue(&self, repo: &str, issue_number: u64) -> Result<Option<Issue>>;

    async fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>>;

    async fn get_comments(&self, repo: &str, issue_number: u64) -> Result<Vec<Comment>>;

    async fn add_comment(&self, repo: &str, issue_number: u64, body: &str) -> Result<Comment>;

    async fn update_labels(&self, repo: &str, issue_number: u64, labels: &[String]) -> Result<()>;

    /// Open PRs whose title or body references `#<issue_number>`.
    async fn search_linked_prs(&self, repo: &str, issue_number: u64) -> Result<Vec<PullRequest>>;
}

pub use github::GitHubPlatform;
