//! Filesystem-backed `StateStore`: one JSON file per key under `runtime_dir`.
//!
//! Atomicity is achieved the same way the teacher's bundling code expects
//! worktree writes to behave: write to a temp file, then rename over the
//! target. Rename is atomic on the same filesystem, so a concurrent `load`
//! always sees a complete document. An `fd-lock` file guards the
//! write-temp-then-rename sequence against two writers racing each other.

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::StateStore;

pub struct FilesystemStateStore {
    base_dir: PathBuf,
}

impl FilesystemStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn doc_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.lock"))
    }
}

#[async_trait]
impl StateStore for FilesystemStateStore {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.doc_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(Some(value))
    }

    async fn save(&self, key: &str, document: serde_json::Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;

        let base_dir = self.base_dir.clone();
        let lock_path = self.lock_path(key);
        let target = self.doc_path(key);
        let serialized = serde_json::to_vec_pretty(&document)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)
                .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;
            let mut lock = fd_lock::RwLock::new(lock_file);
            let _guard = lock
                .write()
                .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;

            let tmp_path = tmp_path_for(&base_dir, &target);
            std::fs::write(&tmp_path, &serialized)
                .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;
            std::fs::rename(&tmp_path, &target)
                .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| OrchestratorError::StateStore(e.to_string()))??;

        Ok(())
    }
}

fn tmp_path_for(base_dir: &Path, target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.json");
    base_dir.join(format!(".{file_name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FilesystemStateStore::new(dir.path());

        assert!(store.load("tracked_issues").await.unwrap().is_none());

        store
            .save("tracked_issues", json!({"42": {"project": "nexus"}}))
            .await
            .unwrap();

        let loaded = store.load("tracked_issues").await.unwrap().unwrap();
        assert_eq!(loaded["42"]["project"], "nexus");
    }

    #[tokio::test]
    async fn overwrite_replaces_the_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FilesystemStateStore::new(dir.path());

        store.save("workflow_mappings", json!({"1": "a"})).await.unwrap();
        store.save("workflow_mappings", json!({"1": "b"})).await.unwrap();

        let loaded = store.load("workflow_mappings").await.unwrap().unwrap();
        assert_eq!(loaded["1"], "b");
    }
}
