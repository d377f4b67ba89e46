//! In-memory release store.
//!
//! Used by tests and by the `memory` state backend. Nothing survives
//! the process.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StateError};

use super::lock::{generate_holder_id, ReleaseGuard, ReleaseLocks};
use super::store::ReleaseStore;
use super::types::{NewRevision, ReleaseKey, ReleaseRecord, ReleaseStatus, Revision};

/// In-memory release store.
#[derive(Debug, Default)]
pub struct InMemoryReleaseStore {
    records: RwLock<BTreeMap<ReleaseKey, ReleaseRecord>>,
    locks: ReleaseLocks,
    history_max: Option<usize>,
}

impl InMemoryReleaseStore {
    /// Creates an empty store that keeps every revision.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of revisions kept per release after each record.
    #[must_use]
    pub const fn with_history_max(mut self, history_max: usize) -> Self {
        self.history_max = Some(history_max);
        self
    }
}

#[async_trait]
impl ReleaseStore for InMemoryReleaseStore {
    async fn load_record(&self, key: &ReleaseKey) -> Result<Option<ReleaseRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list_records(&self) -> Result<Vec<ReleaseRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn record(&self, key: &ReleaseKey, revision: NewRevision) -> Result<Revision> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| ReleaseRecord::new(key.clone()));

        let revision = record.append(revision);
        if let Some(keep) = self.history_max {
            record.prune(keep);
        }

        debug!("Recorded revision {} of {key} ({})", revision.number, revision.status);
        Ok(revision)
    }

    async fn prune(&self, key: &ReleaseKey, keep: usize) -> Result<usize> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| StateError::ReleaseNotFound {
            release: key.to_string(),
        })?;
        Ok(record.prune(keep))
    }

    async fn set_pending(&self, key: &ReleaseKey, status: ReleaseStatus) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(key.clone())
            .or_insert_with(|| ReleaseRecord::new(key.clone()))
            .set_pending(status);
        Ok(())
    }

    async fn clear_pending(&self, key: &ReleaseKey) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(key) {
            record.pending = None;
            if record.revisions.is_empty() {
                records.remove(key);
            }
        }
        Ok(())
    }

    async fn lock(&self, key: &ReleaseKey) -> Result<ReleaseGuard> {
        Ok(self.locks.acquire(key, &generate_holder_id()).await)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ManifestSet, Values};
    use crate::state::types::Operation;

    fn deployed(operation: Operation) -> NewRevision {
        NewRevision::new(ReleaseStatus::Deployed, operation, ManifestSet::empty(), Values::new())
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let store = InMemoryReleaseStore::new();
        let key = ReleaseKey::new("default", "web");

        assert!(store.get_latest(&key).await.unwrap_err().is_not_found());
        assert!(store.get_deployed(&key).await.unwrap().is_none());

        store.record(&key, deployed(Operation::Install)).await.unwrap();
        store.record(&key, deployed(Operation::Upgrade)).await.unwrap();

        assert_eq!(store.get_latest(&key).await.unwrap().number, 2);
        assert_eq!(store.get_deployed(&key).await.unwrap().unwrap().number, 2);
        assert_eq!(
            store.get_revision(&key, 1).await.unwrap().status,
            ReleaseStatus::Superseded
        );
        assert!(store.get_revision(&key, 9).await.is_err());

        let history = store.history(&key, 10).await.unwrap();
        let numbers: Vec<u32> = history.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_history_max_prunes() {
        let store = InMemoryReleaseStore::new().with_history_max(2);
        let key = ReleaseKey::new("default", "web");
        for _ in 0..4 {
            store.record(&key, deployed(Operation::Upgrade)).await.unwrap();
        }
        let history = store.history(&key, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].number, 4);
    }

    #[tokio::test]
    async fn test_pending_status_and_clear() {
        let store = InMemoryReleaseStore::new();
        let key = ReleaseKey::new("default", "web");

        store.set_pending(&key, ReleaseStatus::PendingInstall).await.unwrap();
        assert!(store.list_releases().await.unwrap().is_empty());

        store.clear_pending(&key).await.unwrap();
        assert!(store.load_record(&key).await.unwrap().is_none());

        store.record(&key, deployed(Operation::Install)).await.unwrap();
        store.set_pending(&key, ReleaseStatus::PendingUpgrade).await.unwrap();
        assert_eq!(
            store.release_status(&key).await.unwrap(),
            ReleaseStatus::PendingUpgrade
        );
    }

    #[tokio::test]
    async fn test_list_releases_sorted() {
        let store = InMemoryReleaseStore::new();
        store
            .record(&ReleaseKey::new("prod", "api"), deployed(Operation::Install))
            .await
            .unwrap();
        store
            .record(&ReleaseKey::new("default", "web"), deployed(Operation::Install))
            .await
            .unwrap();

        let names: Vec<String> = store
            .list_releases()
            .await
            .unwrap()
            .iter()
            .map(|s| s.key.to_string())
            .collect();
        assert_eq!(names, vec!["default/web", "prod/api"]);
    }

    #[test]
    fn test_history_limit_from_sync_code() {
        let store = InMemoryReleaseStore::new().with_history_max(2);
        let key = ReleaseKey::new("default", "web");

        tokio_test::block_on(async {
            for _ in 0..4 {
                store.record(&key, deployed(Operation::Upgrade)).await.unwrap();
            }
        });

        let history = tokio_test::block_on(store.history(&key, 10)).unwrap();
        let numbers: Vec<u32> = history.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![4, 3]);
    }
}
