//! Release store trait definition.
//!
//! This module defines the common interface for release storage backends.
//! Backends implement the record-level primitives; revision queries are
//! provided on top of them.

use async_trait::async_trait;

use crate::error::{Result, StateError};

use super::lock::ReleaseGuard;
use super::types::{NewRevision, ReleaseKey, ReleaseRecord, ReleaseStatus, ReleaseSummary, Revision};

/// Trait for release storage backends.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Loads the stored record of a release.
    ///
    /// Returns `None` if the release has never been recorded.
    async fn load_record(&self, key: &ReleaseKey) -> Result<Option<ReleaseRecord>>;

    /// Loads every stored release record.
    async fn list_records(&self) -> Result<Vec<ReleaseRecord>>;

    /// Appends a revision to a release, creating the release if needed.
    ///
    /// The previously deployed revision is marked superseded when the new
    /// revision is deployed or uninstalled, and any pending status is cleared.
    async fn record(&self, key: &ReleaseKey, revision: NewRevision) -> Result<Revision>;

    /// Removes the oldest revisions beyond `keep`, never the deployed one.
    ///
    /// Returns the number of revisions removed.
    async fn prune(&self, key: &ReleaseKey, keep: usize) -> Result<usize>;

    /// Marks an operation as in flight on a release.
    async fn set_pending(&self, key: &ReleaseKey, status: ReleaseStatus) -> Result<()>;

    /// Clears the in-flight marker without recording a revision.
    async fn clear_pending(&self, key: &ReleaseKey) -> Result<()>;

    /// Takes the release's lock, waiting for other in-process holders.
    async fn lock(&self, key: &ReleaseKey) -> Result<ReleaseGuard>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Returns the most recent revision of a release.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReleaseNotFound`] if the release has no revisions.
    async fn get_latest(&self, key: &ReleaseKey) -> Result<Revision> {
        self.load_record(key)
            .await?
            .and_then(|record| record.latest().cloned())
            .ok_or_else(|| not_found(key))
    }

    /// Returns the revision currently deployed, if any.
    async fn get_deployed(&self, key: &ReleaseKey) -> Result<Option<Revision>> {
        Ok(self
            .load_record(key)
            .await?
            .and_then(|record| record.deployed().cloned()))
    }

    /// Returns a specific revision.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReleaseNotFound`] or [`StateError::RevisionNotFound`].
    async fn get_revision(&self, key: &ReleaseKey, number: u32) -> Result<Revision> {
        let record = self.load_record(key).await?.ok_or_else(|| not_found(key))?;
        record.revision(number).cloned().ok_or_else(|| {
            StateError::RevisionNotFound {
                release: key.to_string(),
                revision: number,
            }
            .into()
        })
    }

    /// Returns up to `limit` revisions, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReleaseNotFound`] if the release does not exist.
    async fn history(&self, key: &ReleaseKey, limit: usize) -> Result<Vec<Revision>> {
        let record = self.load_record(key).await?.ok_or_else(|| not_found(key))?;
        Ok(record.history(limit))
    }

    /// Returns the effective status of a release.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReleaseNotFound`] if the release does not exist.
    async fn release_status(&self, key: &ReleaseKey) -> Result<ReleaseStatus> {
        self.load_record(key)
            .await?
            .and_then(|record| record.status())
            .ok_or_else(|| not_found(key))
    }

    /// Lists every release that has at least one revision.
    async fn list_releases(&self) -> Result<Vec<ReleaseSummary>> {
        let mut summaries: Vec<ReleaseSummary> = self
            .list_records()
            .await?
            .iter()
            .filter_map(ReleaseRecord::summary)
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }
}

fn not_found(key: &ReleaseKey) -> crate::error::HalyardError {
    StateError::ReleaseNotFound {
        release: key.to_string(),
    }
    .into()
}

#[async_trait]
impl ReleaseStore for Box<dyn ReleaseStore> {
    async fn load_record(&self, key: &ReleaseKey) -> Result<Option<ReleaseRecord>> {
        (**self).load_record(key).await
    }

    async fn list_records(&self) -> Result<Vec<ReleaseRecord>> {
        (**self).list_records().await
    }

    async fn record(&self, key: &ReleaseKey, revision: NewRevision) -> Result<Revision> {
        (**self).record(key, revision).await
    }

    async fn prune(&self, key: &ReleaseKey, keep: usize) -> Result<usize> {
        (**self).prune(key, keep).await
    }

    async fn set_pending(&self, key: &ReleaseKey, status: ReleaseStatus) -> Result<()> {
        (**self).set_pending(key, status).await
    }

    async fn clear_pending(&self, key: &ReleaseKey) -> Result<()> {
        (**self).clear_pending(key).await
    }

    async fn lock(&self, key: &ReleaseKey) -> Result<ReleaseGuard> {
        (**self).lock(key).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
