//! Repository discovery via libgit2.
//!
//! Grounded on the teacher's `git/operations.rs::Git2Operations`, trimmed
//! to the remote-inspection subset `Router` needs for auto-discovery
//! (spec.md §4.K: "auto-discovery from the workspace directory — each
//! sub-directory with a `.git` folder, whose `origin` URL yields a
//! normalized `namespace/repo` slug"). Branch/cherry-pick/push/fetch
//! operations from the teacher's agent-worktree bundling have no
//! counterpart in spec.md and were dropped, but worktree *removal* does
//! (spec.md §4.J: "always clean worktrees for each referenced issue
//! number" on PR merge) — added here via git2's own worktree API rather
//! than the teacher's shell-out, since the teacher never built this.

use anyhow::{Context, Result};
use git2::Repository;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn as_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

pub trait GitOperations {
    /// Get the normalized `owner/repo` slug for a named remote (default
    /// `origin`), or `None` if the remote or URL is missing/unrecognized.
    fn get_repo_slug(&self, remote_name: Option<&str>) -> Result<Option<RepoSlug>>;

    /// Prunes and removes the named worktree, if it exists. Returns
    /// `Ok(false)` rather than erroring when no such worktree is
    /// registered — a PR can reference an issue no agent ever checked out.
    fn remove_worktree(&self, name: &str) -> Result<bool>;
}

pub struct Git2Operations {
    repo: Repository,
}

impl Git2Operations {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Parse a GitHub-style remote URL (SSH `git@host:owner/repo.git` or
    /// HTTPS `https://host/owner/repo.git`) into an `owner/repo` slug.
    /// Host-agnostic: the spec's `GitPlatform` is an interface, so the
    /// router shouldn't hard-code `github.com`.
    pub(crate) fn parse_remote_url(url: &str) -> Option<RepoSlug> {
        let path = if let Some(rest) = url.strip_prefix("git@") {
            rest.splitn(2, ':').nth(1)?
        } else if let Some(rest) = url.strip_prefix("https://") {
            let mut parts = rest.splitn(2, '/');
            let _host = parts.next()?;
            parts.next()?
        } else if let Some(rest) = url.strip_prefix("http://") {
            let mut parts = rest.splitn(2, '/');
            let _host = parts.next()?;
            parts.next()?
        } else {
            return None;
        };

        let path = path.strip_suffix(".git").unwrap_or(path);
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() >= 2 {
            Some(RepoSlug {
                owner: parts[0].to_string(),
                repo: parts[1].to_string(),
            })
        } else {
            None
        }
    }
}

impl GitOperations for Git2Operations {
    fn get_repo_slug(&self, remote_name: Option<&str>) -> Result<Option<RepoSlug>> {
        let remote_name = remote_name.unwrap_or("origin");
        let remote = match self.repo.find_remote(remote_name) {
            Ok(remote) => remote,
            Err(_) => return Ok(None),
        };
        let url = match remote.url() {
            Some(url) => url,
            None => return Ok(None),
        };
        Ok(Self::parse_remote_url(url))
    }

    fn remove_worktree(&self, name: &str) -> Result<bool> {
        let worktree = match self.repo.find_worktree(name) {
            Ok(worktree) => worktree,
            Err(_) => return Ok(false),
        };
        let path = worktree.path().to_path_buf();
        let mut opts = git2::WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        worktree
            .prune(Some(&mut opts))
            .with_context(|| format!("pruning worktree `{name}` at {path:?}"))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn create_test_repo() -> (tempfile::TempDir, Git2Operations) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();

        let signature = Signature::now("Test", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])
            .unwrap();

        let ops = Git2Operations::new(temp_dir.path()).unwrap();
        (temp_dir, ops)
    }

    #[test]
    fn no_remote_returns_none() {
        let (_dir, ops) = create_test_repo();
        assert!(ops.get_repo_slug(None).unwrap().is_none());
    }

    #[test]
    fn parses_ssh_and_https_remote_urls() {
        let ssh = Git2Operations::parse_remote_url("git@github.com:acme/nexus-core.git").unwrap();
        assert_eq!(ssh.owner, "acme");
        assert_eq!(ssh.repo, "nexus-core");

        let https =
            Git2Operations::parse_remote_url("https://github.com/acme/sampleco-mobile").unwrap();
        assert_eq!(https.owner, "acme");
        assert_eq!(https.repo, "sampleco-mobile");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(Git2Operations::parse_remote_url("not-a-url").is_none());
        assert!(Git2Operations::parse_remote_url("https://github.com/acme").is_none());
    }

    #[test]
    fn removing_an_unknown_worktree_is_a_no_op() {
        let (_dir, ops) = create_test_repo();
        assert!(!ops.remove_worktree("issue-404").unwrap());
    }

    #[test]
    fn removes_an_existing_worktree() {
        let (dir, ops) = create_test_repo();
        let worktree_path = dir.path().join("issue-42-worktree");
        ops.repo
            .worktree("issue-42", &worktree_path, None)
            .unwrap();

        assert!(ops.remove_worktree("issue-42").unwrap());
        assert!(ops.repo.find_worktree("issue-42").is_err());
    }
}
