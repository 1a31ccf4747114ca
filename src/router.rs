//! `Router`: project/repo resolver (spec.md §4.K).
//!
//! Grounded on `original_source/.../repo_resolution_service.py`
//! (`resolve_repo_for_issue`'s candidate-repo walk, issue-URL/body
//! matching) and `original_source/.../inbox_repo_paths_service.py`
//! (workspace path layout, reroute-with-timestamp-suffix on collision).
//! Project configuration loading follows the teacher's `config.rs`
//! layered-source style, narrowed to a single TOML document (spec.md §3's
//! `ProjectConfig` entity) rather than environment variables, since
//! project definitions are operator data, not process config.

use crate::error::{OrchestratorError, Result};
use crate::git::{Git2Operations, GitOperations};
use crate::git_platform::GitPlatform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub workspace: String,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default)]
    pub workflow_definition_path: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Effective PR-merge review policy (spec.md §4.J): `"auto"` notifies
    /// on every merge, `"manual"` suppresses the notification (worktree
    /// cleanup still runs either way).
    #[serde(default = "default_review_mode")]
    pub review_mode: String,
}

fn default_platform() -> String {
    "github".to_string()
}

fn default_agents_dir() -> String {
    "agents".to_string()
}

fn default_review_mode() -> String {
    "manual".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct ProjectConfigFile {
    #[serde(default)]
    projects: HashMap<String, ProjectConfig>,
}

/// Process-wide cache of project definitions (spec.md §3, §5: "a single
/// invalidation token; re-read when that token changes"). The token is
/// the config file's mtime, not a manual signal — whoever edits
/// `projects.toml` on disk gets picked up on the next `ensure_fresh`.
pub struct ProjectRegistry {
    path: PathBuf,
    inner: RwLock<RegistrySnapshot>,
}

struct RegistrySnapshot {
    projects: HashMap<String, ProjectConfig>,
    alias_index: HashMap<String, String>,
    token: Option<SystemTime>,
}

impl ProjectRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = Self::read_snapshot(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(snapshot),
        })
    }

    fn read_snapshot(path: &Path) -> Result<RegistrySnapshot> {
        let token = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());

        let file: ProjectConfigFile = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| OrchestratorError::Router(format!("reading {path:?}: {e}")))?;
            toml::from_str(&raw)
                .map_err(|e| OrchestratorError::Router(format!("parsing {path:?}: {e}")))?
        } else {
            ProjectConfigFile::default()
        };

        let mut alias_index = HashMap::new();
        for (key, cfg) in &file.projects {
            let canonical = key.to_lowercase();
            if canonical.is_empty() {
                return Err(OrchestratorError::Router("project key must be non-empty".into()));
            }
            if alias_index.insert(canonical.clone(), canonical.clone()).is_some() {
                return Err(OrchestratorError::Router(format!(
                    "duplicate project key `{canonical}`"
                )));
            }
            for alias in &cfg.aliases {
                let alias_key = alias.to_lowercase();
                if alias_index.insert(alias_key.clone(), canonical.clone()).is_some() {
                    return Err(OrchestratorError::Router(format!(
                        "alias `{alias_key}` collides with an existing project key or alias"
                    )));
                }
            }
        }

        let projects = file
            .projects
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        Ok(RegistrySnapshot {
            projects,
            alias_index,
            token,
        })
    }

    /// Re-reads the file if its mtime token has changed since the last load.
    fn ensure_fresh(&self) -> Result<()> {
        let current_token = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        let stale = {
            let snapshot = self.inner.read().unwrap();
            snapshot.token != current_token
        };
        if stale {
            let fresh = Self::read_snapshot(&self.path)?;
            *self.inner.write().unwrap() = fresh;
        }
        Ok(())
    }

    pub fn normalize_project_key(&self, raw: &str) -> Result<String> {
        self.ensure_fresh()?;
        let snapshot = self.inner.read().unwrap();
        let trimmed = raw.trim().to_lowercase();
        Ok(snapshot
            .alias_index
            .get(&trimmed)
            .cloned()
            .unwrap_or(trimmed))
    }

    pub fn get(&self, project_key: &str) -> Result<Option<ProjectConfig>> {
        self.ensure_fresh()?;
        let canonical = self.normalize_project_key(project_key)?;
        Ok(self.inner.read().unwrap().projects.get(&canonical).cloned())
    }

    pub fn all(&self) -> Result<Vec<(String, ProjectConfig)>> {
        self.ensure_fresh()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .projects
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Resolves projects, repos, and issue ownership across a multi-project
/// workspace (spec.md §4.K).
pub struct Router {
    registry: ProjectRegistry,
    base_dir: PathBuf,
}

impl Router {
    pub fn new(registry: ProjectRegistry, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            base_dir: base_dir.into(),
        }
    }

    pub fn normalize_project_key(&self, raw: &str) -> Result<String> {
        self.registry.normalize_project_key(raw)
    }

    pub fn project_config(&self, project_key: &str) -> Result<Option<ProjectConfig>> {
        self.registry.get(project_key)
    }

    pub fn all_projects(&self) -> Result<Vec<(String, ProjectConfig)>> {
        self.registry.all()
    }

    /// All repos a project owns: explicit `repos`, or auto-discovered
    /// from `.git` subdirectories of the project's workspace when the
    /// list is empty.
    pub fn repos_for_project(&self, project_key: &str) -> Result<Vec<String>> {
        let Some(cfg) = self.registry.get(project_key)? else {
            return Ok(Vec::new());
        };
        if !cfg.repos.is_empty() {
            return Ok(cfg.repos.clone());
        }
        Ok(self.discover_repos(&cfg.workspace))
    }

    /// Scans `<base_dir>/<workspace>/*` for `.git` folders and reads each
    /// one's `origin` remote, normalizing to a `namespace/repo` slug
    /// (spec.md §4.K auto-discovery path, `repo_resolution_service.py`).
    fn discover_repos(&self, workspace: &str) -> Vec<String> {
        let workspace_dir = self.base_dir.join(workspace);
        let Ok(entries) = std::fs::read_dir(&workspace_dir) else {
            return Vec::new();
        };

        let mut repos = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || !path.join(".git").exists() {
                continue;
            }
            if let Ok(ops) = Git2Operations::new(&path) {
                if let Ok(Some(slug)) = ops.get_repo_slug(None) {
                    repos.push(slug.as_key());
                }
            }
        }
        repos
    }

    /// The review policy governing PR-merge notifications for `repo`
    /// (spec.md §4.J). Falls back to `"manual"` when no project owns the
    /// repo, the conservative default.
    pub fn effective_review_mode(&self, repo: &str) -> Result<String> {
        let Some(project_key) = self.resolve_project_for_repo(repo)? else {
            return Ok(default_review_mode());
        };
        Ok(self
            .registry
            .get(&project_key)?
            .map(|cfg| cfg.review_mode)
            .unwrap_or_else(default_review_mode))
    }

    /// Removes the agent worktree for `issue_number` under whichever
    /// project's workspace owns `repo`, per spec.md §4.J's "always clean
    /// worktrees for each referenced issue number" — unconditional on the
    /// review-policy notification gate. Returns `false` (not an error)
    /// when no such worktree exists; a PR can reference an issue no agent
    /// ever checked out.
    pub fn cleanup_worktree_for_issue(&self, repo: &str, issue_number: u64) -> Result<bool> {
        let Some(project_key) = self.resolve_project_for_repo(repo)? else {
            return Ok(false);
        };
        let Some(cfg) = self.registry.get(&project_key)? else {
            return Ok(false);
        };
        let repo_dir = self.base_dir.join(&cfg.workspace).join(
            repo.rsplit('/').next().unwrap_or(repo),
        );
        let Ok(ops) = Git2Operations::new(&repo_dir) else {
            return Ok(false);
        };
        ops.remove_worktree(&format!("issue-{issue_number}"))
            .map_err(|e| OrchestratorError::Router(format!("removing worktree for issue {issue_number}: {e}")))
    }

    /// The first project whose repo list contains `repo` (spec.md §4.K).
    pub fn resolve_project_for_repo(&self, repo: &str) -> Result<Option<String>> {
        for (project_key, _cfg) in self.registry.all()? {
            if self.repos_for_project(&project_key)?.iter().any(|r| r == repo) {
                return Ok(Some(project_key));
            }
        }
        Ok(None)
    }

    /// Walks candidate repos across every project looking for the one
    /// whose `GitPlatform::get_issue` returns a match, falling back to
    /// `default_project`'s first repo (spec.md §4.K).
    pub async fn resolve_repo_for_issue(
        &self,
        platform: &dyn GitPlatform,
        issue_number: u64,
        default_project: &str,
    ) -> Result<String> {
        let default_repo = self
            .repos_for_project(default_project)?
            .first()
            .cloned()
            .unwrap_or_default();

        let mut candidates = self.repos_for_project(default_project)?;
        for (project_key, _) in self.registry.all()? {
            for repo in self.repos_for_project(&project_key)? {
                if !candidates.contains(&repo) {
                    candidates.push(repo);
                }
            }
        }

        for repo in candidates {
            if platform.get_issue(&repo, issue_number).await.ok().flatten().is_some() {
                return Ok(repo);
            }
        }

        Ok(default_repo)
    }

    /// Atomically moves `filepath` into `target_project`'s inbox
    /// directory, renaming with a timestamp suffix on filename collision
    /// (spec.md §4.K).
    pub fn reroute_webhook_task(&self, filepath: &Path, target_project: &str) -> Result<PathBuf> {
        let canonical = self.normalize_project_key(target_project)?;
        let cfg = self
            .registry
            .get(&canonical)?
            .ok_or_else(|| OrchestratorError::Router(format!("unknown project `{canonical}`")))?;

        let inbox_dir = self.base_dir.join(&cfg.workspace).join(".nexus/inbox").join(&canonical);
        std::fs::create_dir_all(&inbox_dir)
            .map_err(|e| OrchestratorError::Router(format!("creating {inbox_dir:?}: {e}")))?;

        let file_name = filepath
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OrchestratorError::Router("source path has no filename".into()))?;

        let mut target_path = inbox_dir.join(file_name);
        if target_path.exists() {
            let stem = filepath.file_stem().and_then(|s| s.to_str()).unwrap_or("task");
            let ext = filepath.extension().and_then(|e| e.to_str()).unwrap_or("md");
            let suffix = chrono::Utc::now().timestamp();
            target_path = inbox_dir.join(format!("{stem}_{suffix}.{ext}"));
        }

        std::fs::rename(filepath, &target_path)
            .map_err(|e| OrchestratorError::Router(format!("rerouting {filepath:?}: {e}")))?;
        Ok(target_path)
    }

    /// Moves active task files for a closed issue into the project's
    /// `.nexus/archive/<project>/` directory rather than deleting them
    /// (`original_source/.../task_archive_service.py`, supplemented per
    /// SPEC_FULL.md §3).
    pub fn archive_task_files(&self, project_key: &str, issue_number: u64) -> Result<usize> {
        let canonical = self.normalize_project_key(project_key)?;
        let Some(cfg) = self.registry.get(&canonical)? else {
            return Ok(0);
        };

        let project_root = self.base_dir.join(&cfg.workspace);
        let active_dir = project_root.join(".nexus/tasks").join(&canonical).join("active");
        let archive_dir = project_root.join(".nexus/archive").join(&canonical);

        let Ok(entries) = std::fs::read_dir(&active_dir) else {
            return Ok(0);
        };

        let needle = format!("issue_{issue_number}.md");
        let mut archived = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let matches_name = path.file_name().and_then(|n| n.to_str()) == Some(needle.as_str());
            let matches_body = !matches_name
                && std::fs::read_to_string(&path)
                    .map(|content| content.contains(&format!("issues/{issue_number}")))
                    .unwrap_or(false);
            if !matches_name && !matches_body {
                continue;
            }

            std::fs::create_dir_all(&archive_dir)
                .map_err(|e| OrchestratorError::Router(format!("creating {archive_dir:?}: {e}")))?;
            let file_name = path.file_name().unwrap();
            let mut target = archive_dir.join(file_name);
            if target.exists() {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("task");
                target = archive_dir.join(format!("{stem}_{}.md", chrono::Utc::now().timestamp()));
            }
            if std::fs::rename(&path, &target).is_ok() {
                archived += 1;
            }
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("projects.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn normalizes_aliases_to_canonical_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [projects.nexus]
            workspace = "workspace-a"
            repos = ["acme/nexus-core"]
            aliases = ["nx", "Core"]
            "#,
        );
        let registry = ProjectRegistry::load(path).unwrap();
        assert_eq!(registry.normalize_project_key("NX").unwrap(), "nexus");
        assert_eq!(registry.normalize_project_key("core").unwrap(), "nexus");
        assert_eq!(registry.normalize_project_key("unknown").unwrap(), "unknown");
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [projects.nexus]
            workspace = "a"
            aliases = ["shared"]

            [projects.sampleco]
            workspace = "b"
            aliases = ["shared"]
            "#,
        );
        assert!(ProjectRegistry::load(path).is_err());
    }

    #[test]
    fn resolve_project_for_repo_matches_explicit_repo_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [projects.sampleco]
            workspace = "workspace-a"
            repos = ["acme/sampleco-mobile"]
            "#,
        );
        let registry = ProjectRegistry::load(path).unwrap();
        let router = Router::new(registry, dir.path());
        assert_eq!(
            router.resolve_project_for_repo("acme/sampleco-mobile").unwrap(),
            Some("sampleco".to_string())
        );
        assert_eq!(router.resolve_project_for_repo("acme/other").unwrap(), None);
    }

    #[test]
    fn reroute_moves_file_into_target_inbox() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [projects.nexus]
            workspace = "workspace-a"
            repos = ["acme/nexus-core"]
            "#,
        );
        let registry = ProjectRegistry::load(path).unwrap();
        let router = Router::new(registry, dir.path());

        let src_dir = dir.path().join("inbound");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("issue_77.md");
        std::fs::write(&src, "body").unwrap();

        let moved = router.reroute_webhook_task(&src, "nexus").unwrap();
        assert!(moved.ends_with("issue_77.md"));
        assert!(moved.exists());
        assert!(!src.exists());
    }

    #[test]
    fn archive_task_files_moves_matching_issue_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [projects.nexus]
            workspace = "workspace-a"
            repos = ["acme/nexus-core"]
            "#,
        );
        let registry = ProjectRegistry::load(path).unwrap();
        let router = Router::new(registry, dir.path());

        let active_dir = dir.path().join("workspace-a/.nexus/tasks/nexus/active");
        std::fs::create_dir_all(&active_dir).unwrap();
        std::fs::write(active_dir.join("issue_42.md"), "body").unwrap();

        let archived = router.archive_task_files("nexus", 42).unwrap();
        assert_eq!(archived, 1);
        assert!(dir
            .path()
            .join("workspace-a/.nexus/archive/nexus/issue_42.md")
            .exists());
    }
}
