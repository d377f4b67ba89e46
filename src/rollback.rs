//! Rollback controller.
//!
//! Restores a release to a previously deployed revision by re-applying the
//! manifest set stored for that revision. Templates are never re-rendered.
//! A rollback is recorded as a new revision; history is only ever appended.

use tracing::info;

use crate::cluster::ClusterApi;
use crate::error::{ReconcileError, Result, StateError};
use crate::reconciler::{last_applied, Attempt, Reconciler, ReleaseOutcome};
use crate::state::{Operation, ReleaseKey, ReleaseRecord, ReleaseStatus, ReleaseStore, Revision};

/// Controller for rollback operations.
pub struct RollbackController<'r, 'a, S: ReleaseStore + ?Sized, C: ClusterApi + ?Sized> {
    reconciler: &'r Reconciler<'a, S, C>,
}

impl<'r, 'a, S: ReleaseStore + ?Sized, C: ClusterApi + ?Sized> RollbackController<'r, 'a, S, C> {
    /// Creates a controller that applies through `reconciler`.
    #[must_use]
    pub const fn new(reconciler: &'r Reconciler<'a, S, C>) -> Self {
        Self { reconciler }
    }

    /// Rolls `key` back to `target`, or to the default target when `None`.
    ///
    /// The default target is the currently deployed revision when the latest
    /// attempt failed, and otherwise the most recent superseded revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the release or target revision does not exist,
    /// there is no revision to roll back to, the release is uninstalled, or
    /// the store fails. Apply failures are reported in the outcome.
    pub async fn rollback(&self, key: &ReleaseKey, target: Option<u32>) -> Result<ReleaseOutcome> {
        let _guard = self.reconciler.store().lock(key).await?;
        self.rollback_locked(key, target).await
    }

    /// Same as [`Self::rollback`]; the caller must hold the release lock.
    pub(crate) async fn rollback_locked(&self, key: &ReleaseKey, target: Option<u32>) -> Result<ReleaseOutcome> {
        let record = self
            .reconciler
            .store()
            .load_record(key)
            .await?
            .ok_or_else(|| StateError::ReleaseNotFound {
                release: key.to_string(),
            })?;

        let Some(latest) = record.latest() else {
            return Err(StateError::ReleaseNotFound {
                release: key.to_string(),
            }
            .into());
        };
        if latest.status == ReleaseStatus::Uninstalled {
            return Err(ReconcileError::invalid_state(
                key.to_string(),
                "rollback",
                "release is uninstalled; install it again instead",
            )
            .into());
        }

        let target = resolve_target(key, &record, latest, target)?;
        let (current, reapply) = last_applied(&record)?;

        info!("Rolling back {key} to revision {}", target.number);
        self.reconciler
            .apply_revision(Attempt {
                key,
                operation: Operation::Rollback,
                previous: &current,
                base_revision: record.deployed().map(|r| r.number),
                desired: target.manifests.clone(),
                values: target.values.clone(),
                bundle: target.bundle.clone(),
                description: format!("Rollback to {}", target.number),
                reapply,
            })
            .await
    }
}

/// Picks the revision to restore.
fn resolve_target<'a>(
    key: &ReleaseKey,
    record: &'a ReleaseRecord,
    latest: &Revision,
    requested: Option<u32>,
) -> Result<&'a Revision> {
    if let Some(number) = requested {
        let revision = record.revision(number).ok_or_else(|| StateError::RevisionNotFound {
            release: key.to_string(),
            revision: number,
        })?;
        return match revision.status {
            ReleaseStatus::Deployed | ReleaseStatus::Superseded => Ok(revision),
            status => Err(ReconcileError::invalid_state(
                key.to_string(),
                "rollback",
                format!("revision {number} is {status} and was never deployed"),
            )
            .into()),
        };
    }

    if latest.status == ReleaseStatus::Failed
        && let Some(deployed) = record.deployed()
    {
        return Ok(deployed);
    }

    let below = record.deployed().map_or(u32::MAX, |r| r.number);
    record
        .revisions
        .iter()
        .rev()
        .find(|r| r.status == ReleaseStatus::Superseded && r.number < below)
        .ok_or_else(|| {
            StateError::NoPreviousRevision {
                release: key.to_string(),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Fault, InMemoryCluster};
    use crate::error::HalyardError;
    use crate::reconciler::fixtures::{bundle, bundle_with_config, settings, values};
    use crate::reconciler::ReleaseRequest;
    use crate::render::{Bundle, ResourceId};
    use crate::state::InMemoryReleaseStore;
    use serde_json::json;

    fn key() -> ReleaseKey {
        ReleaseKey::new("default", "web")
    }

    fn request<'b>(bundle: &'b Bundle, replicas: u64, image: &str) -> ReleaseRequest<'b> {
        ReleaseRequest {
            key: key(),
            bundle,
            values: values(replicas, image),
        }
    }

    fn reconciler<'a>(
        store: &'a InMemoryReleaseStore,
        cluster: &'a InMemoryCluster,
    ) -> Reconciler<'a, InMemoryReleaseStore, InMemoryCluster> {
        Reconciler::new(store, cluster).with_settings(settings())
    }

    #[tokio::test]
    async fn test_rollback_restores_stored_manifests() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        r.upgrade(request(&bundle, 3, "app:v2"), false).await.unwrap();

        let outcome = r.rollback(&key(), Some(1)).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.revision, 3);
        assert_eq!(outcome.base_revision, Some(2));
        assert_eq!(outcome.updated, 1);

        let first = store.get_revision(&key(), 1).await.unwrap();
        let third = store.get_revision(&key(), 3).await.unwrap();
        assert_eq!(third.manifests, first.manifests);
        assert_eq!(third.values, first.values);
        assert_eq!(third.operation, Operation::Rollback);
        assert_eq!(third.description, "Rollback to 1");
        assert_eq!(
            store.get_revision(&key(), 2).await.unwrap().status,
            ReleaseStatus::Superseded
        );

        let id = ResourceId::new("apps/v1", "Deployment", Some("default"), "web");
        let live = cluster.get(&id).await.unwrap().unwrap();
        assert_eq!(live.content["spec"]["replicas"], json!(1));
    }

    #[tokio::test]
    async fn test_default_target_is_previous_deployed() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        r.upgrade(request(&bundle, 2, "app:v2"), false).await.unwrap();
        r.upgrade(request(&bundle, 3, "app:v3"), false).await.unwrap();

        let outcome = r.rollback(&key(), None).await.unwrap();
        assert_eq!(outcome.revision, 4);
        let restored = store.get_revision(&key(), 4).await.unwrap();
        assert_eq!(restored.description, "Rollback to 2");
    }

    #[tokio::test]
    async fn test_rollback_without_history() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        let err = r.rollback(&key(), None).await.unwrap_err();
        assert!(matches!(err, HalyardError::State(StateError::ReleaseNotFound { .. })));

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let err = r.rollback(&key(), None).await.unwrap_err();
        assert!(matches!(err, HalyardError::State(StateError::NoPreviousRevision { .. })));

        let err = r.rollback(&key(), Some(7)).await.unwrap_err();
        assert!(matches!(
            err,
            HalyardError::State(StateError::RevisionNotFound { revision: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_to_failed_revision_rejected() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let v1 = bundle();
        let v2 = bundle_with_config();
        let r = reconciler(&store, &cluster);

        r.install(request(&v1, 1, "app:v1")).await.unwrap();
        let config = ResourceId::new("v1", "ConfigMap", Some("default"), "web-config");
        cluster.inject(config, Fault::RejectApply { remaining: None }).await;
        r.upgrade(request(&v2, 1, "app:v2"), false).await.unwrap();

        let err = r.rollback(&key(), Some(2)).await.unwrap_err();
        assert!(matches!(err, HalyardError::Reconcile(ReconcileError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_rollback_after_failure_defaults_to_deployed() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let v1 = bundle();
        let v2 = bundle_with_config();
        let r = reconciler(&store, &cluster);

        r.install(request(&v1, 1, "app:v1")).await.unwrap();

        // Fail the upgrade and its automatic rollback.
        let deployment = ResourceId::new("apps/v1", "Deployment", Some("default"), "web");
        cluster
            .inject(deployment.clone(), Fault::RejectApply { remaining: None })
            .await;
        let outcome = r.upgrade(request(&v2, 2, "app:v2"), false).await.unwrap();
        assert!(!outcome.is_success());
        let auto = outcome.rollback.expect("automatic rollback");
        assert!(!auto.is_success());
        assert_eq!(store.release_status(&key()).await.unwrap(), ReleaseStatus::Failed);

        cluster.clear_fault(&deployment).await;
        let manual = r.rollback(&key(), None).await.unwrap();
        assert!(manual.is_success());
        assert_eq!(manual.revision, 4);
        assert_eq!(manual.base_revision, Some(1));

        let first = store.get_revision(&key(), 1).await.unwrap();
        let deployed = store.get_deployed(&key()).await.unwrap().unwrap();
        assert_eq!(deployed.number, 4);
        assert_eq!(deployed.manifests, first.manifests);
        let config = ResourceId::new("v1", "ConfigMap", Some("default"), "web-config");
        assert!(cluster.get(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_after_pruned_history_removes_leftovers() {
        let store = InMemoryReleaseStore::new().with_history_max(2);
        let cluster = InMemoryCluster::new();
        let v1 = bundle();
        let v2 = bundle_with_config();
        let r = reconciler(&store, &cluster);

        r.install(request(&v1, 1, "app:v1")).await.unwrap();

        let deployment = ResourceId::new("apps/v1", "Deployment", Some("default"), "web");
        cluster
            .inject(deployment.clone(), Fault::RejectApply { remaining: None })
            .await;
        let outcome = r.upgrade(request(&v2, 2, "app:v2"), false).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.rollback.is_some_and(|auto| !auto.is_success()));

        let config = ResourceId::new("v1", "ConfigMap", Some("default"), "web-config");
        assert!(cluster.get(&config).await.unwrap().is_some());
        assert!(store.get_revision(&key(), 2).await.is_ok());

        cluster.clear_fault(&deployment).await;
        let manual = r.rollback(&key(), None).await.unwrap();
        assert!(manual.is_success());
        assert_eq!(manual.revision, 4);
        assert!(cluster.get(&config).await.unwrap().is_none());

        let numbers: Vec<u32> = store
            .history(&key(), 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.number)
            .collect();
        assert_eq!(numbers, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_rollback_of_uninstalled_release() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        r.uninstall(&key()).await.unwrap();

        let err = r.rollback(&key(), Some(1)).await.unwrap_err();
        assert!(matches!(err, HalyardError::Reconcile(ReconcileError::InvalidState { .. })));
    }
}
