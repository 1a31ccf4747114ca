//! Persistent idempotency ledger for workflow step completion events
//! (spec.md §4.D).
//!
//! Grounded on `original_source/nexus/core/idempotency.py`: a composite
//! key `(issue_id, step_num, agent_type, event_id)` hashed with SHA-256,
//! append-only set semantics. Here the in-memory `seen` set is mirrored
//! to the `StateStore` under [`crate::state_store::keys::IDEMPOTENCY_LEDGER`]
//! instead of a dedicated file, so it shares the same backend as the rest
//! of the orchestrator's durable state.

use crate::error::Result;
use crate::state_store::{keys, StateStore};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub issue_id: String,
    pub step_num: u32,
    pub agent_type: String,
    pub event_id: String,
}

impl IdempotencyKey {
    pub fn new(
        issue_id: impl Into<String>,
        step_num: u32,
        agent_type: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            step_num,
            agent_type: agent_type.into(),
            event_id: event_id.into(),
        }
    }

    /// Stable hex digest of `"{issue}:{step}:{agent}:{event}"`.
    pub fn digest(&self) -> String {
        let raw = format!(
            "{}:{}:{}:{}",
            self.issue_id, self.step_num, self.agent_type, self.event_id
        );
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct IdempotencyLedger {
    store: Arc<dyn StateStore>,
    seen: RwLock<HashSet<String>>,
}

impl IdempotencyLedger {
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self> {
        let seen = match store.load(keys::IDEMPOTENCY_LEDGER).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => HashSet::new(),
        };
        Ok(Self {
            store,
            seen: RwLock::new(seen),
        })
    }

    pub async fn is_duplicate(&self, key: &IdempotencyKey) -> bool {
        self.seen.read().await.contains(&key.digest())
    }

    /// Marks `key` processed and persists the ledger. A no-op, without a
    /// write, if the digest is already present (append-only, idempotent).
    pub async fn record(&self, key: &IdempotencyKey) -> Result<()> {
        let digest = key.digest();
        let already_present = {
            let mut seen = self.seen.write().await;
            !seen.insert(digest)
        };
        if already_present {
            return Ok(());
        }

        let snapshot: Vec<String> = self.seen.read().await.iter().cloned().collect();
        self.store
            .save(keys::IDEMPOTENCY_LEDGER, serde_json::to_value(snapshot)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::FilesystemStateStore;

    fn key(event: &str) -> IdempotencyKey {
        IdempotencyKey::new("42", 3, "developer", event)
    }

    #[tokio::test]
    async fn unrecorded_key_is_not_duplicate() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStateStore::new(dir.path()));
        let ledger = IdempotencyLedger::load(store).await.unwrap();
        assert!(!ledger.is_duplicate(&key("comment-789")).await);
    }

    #[tokio::test]
    async fn recording_makes_the_key_a_duplicate() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStateStore::new(dir.path()));
        let ledger = IdempotencyLedger::load(store).await.unwrap();

        let k = key("comment-789");
        ledger.record(&k).await.unwrap();
        assert!(ledger.is_duplicate(&k).await);
    }

    #[tokio::test]
    async fn ledger_persists_across_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir.path()));

        let ledger = IdempotencyLedger::load(store.clone()).await.unwrap();
        ledger.record(&key("comment-789")).await.unwrap();

        let reloaded = IdempotencyLedger::load(store).await.unwrap();
        assert!(reloaded.is_duplicate(&key("comment-789")).await);
    }

    #[tokio::test]
    async fn distinct_event_ids_are_independent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStateStore::new(dir.path()));
        let ledger = IdempotencyLedger::load(store).await.unwrap();

        ledger.record(&key("comment-789")).await.unwrap();
        assert!(!ledger.is_duplicate(&key("comment-790")).await);
    }
}
