//! GitHub-backed `GitPlatform`, grounded on the teacher's `github/client.rs`,
//! `github/issues.rs`, `github/comments.rs` and `github/pulls.rs` call
//! shapes, wrapped behind `http::RateLimitedHttpClient` for the same
//! token-bucket + response cache the teacher uses, and a per-call deadline
//! (spec.md §5: "All `GitPlatform` operations are blocking I/O and must be
//! cancellable with a deadline (default 30s). Use timeouts, not thread
//! kills.").

use super::{Comment, GitPlatform, Issue, IssueState, PullRequest};
use crate::error::{OrchestratorError, Result};
use crate::http::RateLimitedHttpClient;
use async_trait::async_trait;
use octocrab::params::State as OctoState;
use std::time::Duration;

pub struct GitHubPlatform {
    client: RateLimitedHttpClient,
    deadline: Duration,
}

impl GitHubPlatform {
    pub fn new(client: RateLimitedHttpClient) -> Self {
        Self {
            client,
            deadline: Duration::from_secs(30),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn split_repo(repo: &str) -> Result<(&str, &str)> {
        repo.split_once('/')
            .ok_or_else(|| OrchestratorError::Platform(format!("invalid repo slug `{repo}`")))
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.deadline, fut)
            .await
            .map_err(|_| OrchestratorError::Platform("request exceeded deadline".into()))?
    }
}

fn into_issue(issue: octocrab::models::issues::Issue) -> Issue {
    Issue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        url: issue.html_url.to_string(),
        state: match issue.state {
            octocrab::models::IssueState::Closed => IssueState::Closed,
            _ => IssueState::Open,
        },
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        author: issue.user.login,
    }
}

fn into_comment(comment: octocrab::models::issues::Comment) -> Comment {
    Comment {
        id: comment.id.0,
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
        created_at: comment.created_at,
    }
}

fn into_pull_request(pr: octocrab::models::pulls::PullRequest) -> PullRequest {
    PullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        url: pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_default(),
        merged: pr.merged_at.is_some(),
        state: match pr.state {
            Some(octocrab::models::IssueState::Closed) => IssueState::Closed,
            _ => IssueState::Open,
        },
    }
}

#[async_trait]
impl GitPlatform for GitHubPlatform {
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            let issue = self
                .client
                .octocrab()
                .issues(owner, name)
                .create(title)
                .body(body)
                .labels(labels.to_vec())
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(into_issue(issue))
        })
        .await
    }

    async fn close_issue(&self, repo: &str, issue_number: u64) -> Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            self.client
                .octocrab()
                .issues(owner, name)
                .update(issue_number)
                .state(octocrab::models::IssueState::Closed)
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_issue(&self, repo: &str, issue_number: u64) -> Result<Option<Issue>> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            match self.client.octocrab().issues(owner, name).get(issue_number).await {
                Ok(issue) => Ok(Some(into_issue(issue))),
                Err(octocrab::Error::GitHub { source, .. }) if source.status_code == 404 => {
                    Ok(None)
                }
                Err(e) => Err(OrchestratorError::Platform(e.to_string())),
            }
        })
        .await
    }

    async fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            let page = self
                .client
                .octocrab()
                .issues(owner, name)
                .list()
                .state(OctoState::Open)
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(page
                .items
                .into_iter()
                .filter(|i| i.pull_request.is_none())
                .map(into_issue)
                .collect())
        })
        .await
    }

    async fn get_comments(&self, repo: &str, issue_number: u64) -> Result<Vec<Comment>> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            let page = self
                .client
                .octocrab()
                .issues(owner, name)
                .list_comments(issue_number)
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(page.items.into_iter().map(into_comment).collect())
        })
        .await
    }

    async fn add_comment(&self, repo: &str, issue_number: u64, body: &str) -> Result<Comment> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            let comment = self
                .client
                .octocrab()
                .issues(owner, name)
                .create_comment(issue_number, body)
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(into_comment(comment))
        })
        .await
    }

    async fn update_labels(&self, repo: &str, issue_number: u64, labels: &[String]) -> Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            self.client
                .octocrab()
                .issues(owner, name)
                .update(issue_number)
                .labels(labels.to_vec())
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn search_linked_prs(&self, repo: &str, issue_number: u64) -> Result<Vec<PullRequest>> {
        let (owner, name) = Self::split_repo(repo)?;
        self.with_deadline(async {
            let page = self
                .client
                .octocrab()
                .pulls(owner, name)
                .list()
                .state(OctoState::Open)
                .send()
                .await
                .map_err(|e| OrchestratorError::Platform(e.to_string()))?;

            let needle = format!("#{issue_number}");
            Ok(page
                .items
                .into_iter()
                .filter(|pr| {
                    pr.title.as_deref().unwrap_or_default().contains(&needle)
                        || pr.body.as_deref().unwrap_or_default().contains(&needle)
                })
                .map(into_pull_request)
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn split_repo_rejects_missing_slash() {
        let err = GitHubPlatform::split_repo("no-slash").unwrap_err();
        assert!(matches!(err, OrchestratorError::Platform(_)));
    }

    #[test]
    fn split_repo_splits_owner_and_name() {
        let (owner, name) = GitHubPlatform::split_repo("acme/nexus-core").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(name, "nexus-core");
    }

    fn platform(client: RateLimitedHttpClient) -> GitHubPlatform {
        GitHubPlatform::new(client)
    }

    #[tokio::test]
    async fn get_issue_maps_a_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/999"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found",
            })))
            .mount(&server)
            .await;

        let client =
            RateLimitedHttpClient::new_with_base_uri("token".to_string(), &server.uri(), 100, 100).unwrap();
        let result = platform(client).get_issue("acme/widgets", 999).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_issue_maps_a_200_into_an_issue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "number": 42,
                "title": "Crash on launch",
                "body": "steps to reproduce",
                "html_url": "https://github.com/acme/widgets/issues/42",
                "state": "open",
                "labels": [{"name": "bug"}],
                "user": {"login": "reporter"},
            })))
            .mount(&server)
            .await;

        let client =
            RateLimitedHttpClient::new_with_base_uri("token".to_string(), &server.uri(), 100, 100).unwrap();
        let issue = platform(client).get_issue("acme/widgets", 42).await.unwrap().unwrap();
        assert_eq!(issue.number, 42);
        assert_eq!(issue.title, "Crash on launch");
        assert_eq!(issue.state, IssueState::Open);
        assert_eq!(issue.labels, vec!["bug".to_string()]);
        assert_eq!(issue.author, "reporter");
    }

    #[tokio::test]
    async fn list_open_issues_filters_out_pull_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 1,
                    "title": "A real issue",
                    "body": "",
                    "html_url": "https://github.com/acme/widgets/issues/1",
                    "state": "open",
                    "labels": [],
                    "user": {"login": "someone"},
                },
                {
                    "number": 2,
                    "title": "A pull request",
                    "body": "",
                    "html_url": "https://github.com/acme/widgets/issues/2",
                    "state": "open",
                    "labels": [],
                    "user": {"login": "someone"},
                    "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/2"},
                },
            ])))
            .mount(&server)
            .await;

        let client =
            RateLimitedHttpClient::new_with_base_uri("token".to_string(), &server.uri(), 100, 100).unwrap();
        let issues = platform(client).list_open_issues("acme/widgets").await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 1);
    }

    #[tokio::test]
    async fn create_issue_posts_title_body_and_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/issues"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 7,
                "title": "New issue",
                "body": "details",
                "html_url": "https://github.com/acme/widgets/issues/7",
                "state": "open",
                "labels": [{"name": "workflow:queued"}],
                "user": {"login": "nexus-bot"},
            })))
            .mount(&server)
            .await;

        let client =
            RateLimitedHttpClient::new_with_base_uri("token".to_string(), &server.uri(), 100, 100).unwrap();
        let issue = platform(client)
            .create_issue("acme/widgets", "New issue", "details", &["workflow:queued".to_string()])
            .await
            .unwrap();
        assert_eq!(issue.number, 7);
        assert_eq!(issue.labels, vec!["workflow:queued".to_string()]);
    }
}
