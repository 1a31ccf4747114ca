//! `FeatureRegistry`: dedup-aware record of already-implemented features
//! per project (spec.md §4.F).
//!
//! Grounded on `original_source/.../feature_registry_command_handlers.py`
//! (`feature_done`/`feature_list`/`feature_forget` semantics: id-then-title
//! lookup, manual-override preservation) and
//! `config_storage_capabilities.py`'s "conservative by design" framing for
//! `ingest_completion`. `strsim::normalized_levenshtein` stands in for the
//! source's `SequenceMatcher.ratio` similarity.

use crate::state_store::{keys, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub feature_id: String,
    pub project_key: String,
    pub canonical_title: String,
    pub canonical_title_hash: String,
    pub aliases: Vec<String>,
    pub source_issue: Option<String>,
    pub source_pr: Option<String>,
    pub manual_override: bool,
    pub created_at: DateTime<Utc>,
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn title_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    projects: HashMap<String, Vec<FeatureRecord>>,
}

pub struct FeatureRegistry {
    store: Arc<dyn StateStore>,
    max_items_per_project: usize,
    lock: Mutex<()>,
}

impl FeatureRegistry {
    pub fn new(store: Arc<dyn StateStore>, max_items_per_project: usize) -> Self {
        Self {
            store,
            max_items_per_project,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> crate::error::Result<RegistryDocument> {
        match self.store.load(keys::FEATURE_REGISTRY).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_default()),
            None => Ok(RegistryDocument::default()),
        }
    }

    async fn save(&self, doc: &RegistryDocument) -> crate::error::Result<()> {
        self.store
            .save(keys::FEATURE_REGISTRY, serde_json::to_value(doc)?)
            .await
    }

    /// Insert or merge a feature record. Uniqueness is
    /// `(project_key, sha256(lower(trim(title))))`; on conflict, aliases
    /// are merged and `manual_override` is only raised, never lowered,
    /// unless the caller explicitly requests `manual_override = true`.
    pub async fn upsert(
        &self,
        project_key: &str,
        canonical_title: &str,
        aliases: &[String],
        source_issue: Option<String>,
        source_pr: Option<String>,
        manual_override: bool,
    ) -> crate::error::Result<FeatureRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let normalized = normalize_title(canonical_title);
        let hash = title_hash(&normalized);
        let records = doc.projects.entry(project_key.to_string()).or_default();

        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.canonical_title_hash == hash)
        {
            for alias in aliases {
                if !existing.aliases.contains(alias) {
                    existing.aliases.push(alias.clone());
                }
            }
            if manual_override {
                existing.manual_override = true;
            }
            if existing.source_issue.is_none() {
                existing.source_issue = source_issue;
            }
            if existing.source_pr.is_none() {
                existing.source_pr = source_pr;
            }
            let result = existing.clone();
            self.save(&doc).await?;
            return Ok(result);
        }

        let record = FeatureRecord {
            feature_id: uuid::Uuid::new_v4().to_string(),
            project_key: project_key.to_string(),
            canonical_title: canonical_title.trim().to_string(),
            canonical_title_hash: hash,
            aliases: aliases.to_vec(),
            source_issue,
            source_pr,
            manual_override,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        self.save(&doc).await?;
        Ok(record)
    }

    /// Records newest-first, bounded by `max_items_per_project`.
    pub async fn list(&self, project_key: &str) -> crate::error::Result<Vec<FeatureRecord>> {
        let doc = self.load().await?;
        let mut records = doc
            .projects
            .get(project_key)
            .cloned()
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(self.max_items_per_project);
        Ok(records)
    }

    /// Matches by `feature_id` first, falling back to canonical title
    /// (case-insensitive).
    pub async fn forget(
        &self,
        project_key: &str,
        feature_ref: &str,
    ) -> crate::error::Result<Option<FeatureRecord>> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let Some(records) = doc.projects.get_mut(project_key) else {
            return Ok(None);
        };

        let index = records
            .iter()
            .position(|r| r.feature_id == feature_ref)
            .or_else(|| {
                let normalized = normalize_title(feature_ref);
                records
                    .iter()
                    .position(|r| normalize_title(&r.canonical_title) == normalized)
            });

        let Some(index) = index else {
            return Ok(None);
        };
        let removed = records.remove(index);
        self.save(&doc).await?;
        Ok(Some(removed))
    }

    /// Keeps candidates whose title has normalized similarity below
    /// `similarity_threshold` against every existing canonical title in
    /// the project; everything else is reported as removed.
    pub async fn filter_ideation(
        &self,
        project_key: &str,
        items: Vec<String>,
        similarity_threshold: f64,
    ) -> crate::error::Result<(Vec<String>, Vec<String>)> {
        let existing = self.list(project_key).await?;
        let existing_titles: Vec<String> = existing
            .iter()
            .map(|r| normalize_title(&r.canonical_title))
            .collect();

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        for item in items {
            let normalized = normalize_title(&item);
            let is_duplicate = existing_titles.iter().any(|title| {
                strsim::normalized_levenshtein(title, &normalized) >= similarity_threshold
            });
            if is_duplicate {
                removed.push(item);
            } else {
                kept.push(item);
            }
        }
        Ok((kept, removed))
    }

    /// Insert a record only when `status == "complete"` and
    /// `key_findings` contains a line beginning with `"Feature:"` or
    /// `"Implemented:"`. Conservative by design: anything else silently
    /// returns `None` rather than guessing at a title.
    pub async fn ingest_completion(
        &self,
        project_key: &str,
        issue_id: &str,
        status: &str,
        key_findings: &[String],
    ) -> crate::error::Result<Option<FeatureRecord>> {
        if status != "complete" {
            return Ok(None);
        }

        let title = key_findings.iter().find_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix("Feature:")
                .or_else(|| trimmed.strip_prefix("Implemented:"))
                .map(|t| t.trim().to_string())
        });

        let Some(title) = title.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let record = self
            .upsert(project_key, &title, &[], Some(issue_id.to_string()), None, false)
            .await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::FilesystemStateStore;

    fn registry() -> (tempfile::TempDir, FeatureRegistry) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStateStore::new(dir.path()));
        (dir, FeatureRegistry::new(store, 50))
    }

    #[tokio::test]
    async fn upsert_merges_aliases_on_conflict() {
        let (_dir, registry) = registry();
        registry
            .upsert(
                "nexus",
                "Improve onboarding funnel",
                &["onboarding fix".to_string()],
                None,
                None,
                false,
            )
            .await
            .unwrap();
        let second = registry
            .upsert(
                "nexus",
                "improve onboarding funnel",
                &["funnel improvements".to_string()],
                None,
                None,
                false,
            )
            .await
            .unwrap();

        let all = registry.list("nexus").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(second.aliases.len(), 2);
    }

    #[tokio::test]
    async fn forget_returns_registry_to_pre_upsert_state() {
        let (_dir, registry) = registry();
        let record = registry
            .upsert("nexus", "Add SOC2 export tooling", &[], None, None, false)
            .await
            .unwrap();
        assert_eq!(registry.list("nexus").await.unwrap().len(), 1);

        let removed = registry
            .forget("nexus", &record.feature_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed.feature_id, record.feature_id);
        assert!(registry.list("nexus").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forget_matches_by_title_when_id_unknown() {
        let (_dir, registry) = registry();
        registry
            .upsert("nexus", "Export tooling", &[], None, None, false)
            .await
            .unwrap();
        let removed = registry
            .forget("nexus", "export tooling")
            .await
            .unwrap();
        assert!(removed.is_some());
    }

    #[tokio::test]
    async fn filter_ideation_on_empty_registry_returns_all() {
        let (_dir, registry) = registry();
        let items = vec!["A".to_string(), "B".to_string()];
        let (kept, removed) = registry
            .filter_ideation("nexus", items.clone(), 0.86)
            .await
            .unwrap();
        assert_eq!(kept, items);
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn filter_ideation_drops_near_duplicates() {
        let (_dir, registry) = registry();
        registry
            .upsert("nexus", "Improve onboarding funnel", &[], None, None, false)
            .await
            .unwrap();

        let (kept, removed) = registry
            .filter_ideation(
                "nexus",
                vec![
                    "Improve onboarding funnel".to_string(),
                    "Improve onboarding funnels".to_string(),
                    "Add SOC2 export tooling".to_string(),
                ],
                0.86,
            )
            .await
            .unwrap();

        assert_eq!(kept, vec!["Add SOC2 export tooling".to_string()]);
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn ingest_completion_requires_complete_status_and_marker_line() {
        let (_dir, registry) = registry();
        let ignored = registry
            .ingest_completion("nexus", "42", "complete", &["no marker here".to_string()])
            .await
            .unwrap();
        assert!(ignored.is_none());

        let ignored_status = registry
            .ingest_completion("nexus", "42", "failed", &["Feature: Thing".to_string()])
            .await
            .unwrap();
        assert!(ignored_status.is_none());

        let accepted = registry
            .ingest_completion(
                "nexus",
                "42",
                "complete",
                &["Feature: Dark mode toggle".to_string()],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.canonical_title, "Dark mode toggle");
    }
}
