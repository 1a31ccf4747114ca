//! Minimal GitHub webhook payload shapes (spec.md §6 "Webhook headers
//! required"). Only the fields the router's handlers read are modeled;
//! unknown fields are ignored by `serde`'s default behavior.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub html_url: String,
    #[serde(default, deserialize_with = "deserialize_label_names")]
    pub labels: Vec<String>,
}

/// GitHub's real payload nests labels as `{ "name": "..." }` objects;
/// flattens them to plain strings, which is all the router's handlers need.
fn deserialize_label_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct NamedLabel {
        name: String,
    }
    let labels: Vec<NamedLabel> = Vec::deserialize(deserializer)?;
    Ok(labels.into_iter().map(|l| l.name).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentPayload {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    pub user: CommentUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub comment: CommentPayload,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub merged: bool,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestPayload,
    pub repository: Repository,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_issues_opened_payload() {
        let raw = serde_json::json!({
            "action": "opened",
            "issue": { "number": 77, "title": "Crash on launch", "body": "steps...", "html_url": "https://x/77", "labels": [] },
            "repository": { "full_name": "acme/sampleco-mobile" }
        });
        let event: IssuesEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.issue.number, 77);
        assert_eq!(event.repository.full_name, "acme/sampleco-mobile");
    }

    #[test]
    fn parses_an_issue_comment_payload() {
        let raw = serde_json::json!({
            "action": "created",
            "issue": { "number": 42, "title": "x", "body": "", "html_url": "https://x/42", "labels": [] },
            "comment": { "id": 789, "body": "## step complete — developer\n\nready for @reviewer", "user": { "login": "nexus-bot" } },
            "repository": { "full_name": "acme/nexus-core" }
        });
        let event: IssueCommentEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.comment.id, 789);
        assert_eq!(event.comment.user.login, "nexus-bot");
    }
}
