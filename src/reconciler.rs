//! Reconciler for release operations.
//!
//! This module implements the apply pipeline shared by every mutating
//! operation: take the release lock, render, diff against the last applied
//! state, execute the plan tier by tier, and record the outcome as a new
//! revision. A failed upgrade hands off to the rollback controller.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cluster::{ClusterApi, Readiness};
use crate::error::{HalyardError, PlanError, ReconcileError, Result, StateError};
use crate::planner::{
    CancelToken, DeploymentPlan, DiffEngine, DiffResult, ExecutionResult, ExecutorSettings, PlanExecutor,
};
use crate::render::{Bundle, ManifestSet, ReleaseContext, Renderer, ResourceId, Values};
use crate::rollback::RollbackController;
use crate::state::{
    BundleRef, NewRevision, Operation, ReleaseKey, ReleaseRecord, ReleaseStatus, ReleaseStore, Revision,
};

/// Reconciler for release operations.
pub struct Reconciler<'a, S: ReleaseStore + ?Sized, C: ClusterApi + ?Sized> {
    /// Release store.
    store: &'a S,
    /// Cluster API.
    cluster: &'a C,
    /// Template renderer.
    renderer: Renderer,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Retry and timeout settings.
    settings: ExecutorSettings,
    /// Cancellation flag shared with the caller.
    cancel: CancelToken,
}

/// Input for install, upgrade and plan previews.
#[derive(Debug, Clone)]
pub struct ReleaseRequest<'b> {
    /// Target release.
    pub key: ReleaseKey,
    /// Bundle to render.
    pub bundle: &'b Bundle,
    /// Fully merged values tree.
    pub values: Values,
}

/// Result of a mutating release operation.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    /// Release operated on.
    pub release: ReleaseKey,
    /// Operation performed.
    pub operation: Operation,
    /// Revision recorded for this attempt.
    pub revision: u32,
    /// Status of that revision.
    pub status: ReleaseStatus,
    /// Deployed revision the plan was computed against.
    pub base_revision: Option<u32>,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Failure that ended the attempt, if any.
    pub failure: Option<ReconcileError>,
    /// Automatic rollback performed after a failed upgrade.
    pub rollback: Option<Box<ReleaseOutcome>>,
}

/// A plan together with the diff it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    /// Per-resource diff.
    pub diff: DiffResult,
    /// Resulting plan.
    pub plan: DeploymentPlan,
}

/// Live view of a release.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    /// Release identity.
    pub release: ReleaseKey,
    /// Latest revision.
    pub revision: u32,
    /// Effective status.
    pub status: ReleaseStatus,
    /// Operation that produced the latest revision.
    pub operation: Operation,
    /// Description of the latest revision.
    pub description: String,
    /// Readiness of every resource in the deployed (or latest) manifest set.
    pub resources: Vec<ResourceReport>,
}

/// Live readiness of one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    /// Resource identity.
    pub id: ResourceId,
    /// Ordering weight.
    pub weight: i32,
    /// Observed readiness.
    pub readiness: Readiness,
}

/// Everything `apply_revision` needs to run one attempt.
pub(crate) struct Attempt<'r> {
    pub key: &'r ReleaseKey,
    pub operation: Operation,
    /// Manifest set currently believed to be applied.
    pub previous: &'r ManifestSet,
    /// Deployed revision number observed when planning.
    pub base_revision: Option<u32>,
    pub desired: ManifestSet,
    pub values: Values,
    pub bundle: Option<BundleRef>,
    pub description: String,
    /// Re-apply resources the diff considers unchanged.
    pub reapply: bool,
}

impl<'a, S: ReleaseStore + ?Sized, C: ClusterApi + ?Sized> Reconciler<'a, S, C> {
    /// Creates a new reconciler with default settings.
    #[must_use]
    pub fn new(store: &'a S, cluster: &'a C) -> Self {
        Self {
            store,
            cluster,
            renderer: Renderer::new(),
            diff_engine: DiffEngine::new(),
            settings: ExecutorSettings::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the retry and timeout settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the release store.
    #[must_use]
    pub const fn store(&self) -> &'a S {
        self.store
    }

    /// Renders a request for the given revision number.
    ///
    /// # Errors
    ///
    /// Returns a render error; nothing reaches the cluster.
    pub fn render(&self, req: &ReleaseRequest<'_>, revision: u32) -> Result<ManifestSet> {
        let release = ReleaseContext {
            name: req.key.name.clone(),
            namespace: req.key.namespace.clone(),
            revision,
        };
        self.renderer.render(req.bundle, &req.values, &release)
    }

    /// Installs a release.
    ///
    /// Allowed when the release does not exist, or when nothing is deployed
    /// (its latest revision is `failed` or `uninstalled`).
    ///
    /// # Errors
    ///
    /// Returns an error if the release is already deployed, rendering fails,
    /// or the store fails. Apply failures are reported in the outcome.
    pub async fn install(&self, req: ReleaseRequest<'_>) -> Result<ReleaseOutcome> {
        let _guard = self.store.lock(&req.key).await?;
        let record = self.store.load_record(&req.key).await?;

        if let Some(deployed) = record.as_ref().and_then(ReleaseRecord::deployed) {
            return Err(ReconcileError::invalid_state(
                req.key.to_string(),
                "install",
                format!("revision {} is deployed; use upgrade", deployed.number),
            )
            .into());
        }

        let next = record.as_ref().map_or(1, |r| r.last_revision + 1);
        let desired = self.render(&req, next)?;
        let (previous, reapply) = match &record {
            Some(record) => last_applied(record)?,
            None => (ManifestSet::empty(), false),
        };

        self.apply_revision(Attempt {
            key: &req.key,
            operation: Operation::Install,
            previous: &previous,
            base_revision: None,
            desired,
            values: req.values,
            bundle: Some(bundle_ref(req.bundle)),
            description: String::from("Install complete"),
            reapply,
        })
        .await
    }

    /// Upgrades a deployed release.
    ///
    /// On failure the attempt is recorded as `failed` and the previously
    /// deployed revision is restored automatically, unless the run was
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the release has nothing deployed (and
    /// `install_if_missing` is false), rendering fails, the plan base changed,
    /// or the store fails.
    pub async fn upgrade(&self, req: ReleaseRequest<'_>, install_if_missing: bool) -> Result<ReleaseOutcome> {
        let guard = self.store.lock(&req.key).await?;
        let record = self.store.load_record(&req.key).await?;

        let Some(deployed) = record.as_ref().and_then(ReleaseRecord::deployed).cloned() else {
            if install_if_missing {
                info!("{} has nothing deployed, installing instead", req.key);
                drop(guard);
                return self.install(req).await;
            }
            return Err(match record {
                None => StateError::ReleaseNotFound {
                    release: req.key.to_string(),
                }
                .into(),
                Some(_) => {
                    ReconcileError::invalid_state(req.key.to_string(), "upgrade", "no revision is deployed").into()
                }
            });
        };

        let next = record.as_ref().map_or(1, |r| r.last_revision + 1);
        let desired = self.render(&req, next)?;
        let (previous, reapply) = match &record {
            Some(record) => last_applied(record)?,
            None => (deployed.manifests.clone(), false),
        };

        let mut outcome = self
            .apply_revision(Attempt {
                key: &req.key,
                operation: Operation::Upgrade,
                previous: &previous,
                base_revision: Some(deployed.number),
                desired,
                values: req.values,
                bundle: Some(bundle_ref(req.bundle)),
                description: String::from("Upgrade complete"),
                reapply,
            })
            .await?;

        match &outcome.failure {
            None => {}
            Some(ReconcileError::Cancelled { .. }) => {
                warn!("Upgrade of {} was cancelled; not rolling back automatically", req.key);
            }
            Some(failure) => {
                warn!(
                    "Upgrade of {} failed ({failure}); rolling back to revision {}",
                    req.key, deployed.number
                );
                let rollback = RollbackController::new(self)
                    .rollback_locked(&req.key, Some(deployed.number))
                    .await?;
                outcome.rollback = Some(Box::new(rollback));
            }
        }

        Ok(outcome)
    }

    /// Uninstalls a release by deleting every resource it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the release does not exist or is already
    /// uninstalled, or the store fails.
    pub async fn uninstall(&self, key: &ReleaseKey) -> Result<ReleaseOutcome> {
        let _guard = self.store.lock(key).await?;
        let record = self
            .store
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
            return Err(ReconcileError::invalid_state(key.to_string(), "uninstall", "already uninstalled").into());
        }

        let deployed = record.deployed();
        let source: &Revision = deployed.unwrap_or(latest);
        let (previous, _) = last_applied(&record)?;

        self.apply_revision(Attempt {
            key,
            operation: Operation::Uninstall,
            previous: &previous,
            base_revision: deployed.map(|r| r.number),
            desired: ManifestSet::empty(),
            values: source.values.clone(),
            bundle: source.bundle.clone(),
            description: String::from("Uninstall complete"),
            reapply: false,
        })
        .await
    }

    /// Rolls a release back to `target` (or the default target).
    ///
    /// # Errors
    ///
    /// See [`RollbackController::rollback`].
    pub async fn rollback(&self, key: &ReleaseKey, target: Option<u32>) -> Result<ReleaseOutcome> {
        RollbackController::new(self).rollback(key, target).await
    }

    /// Computes the plan an upgrade (or first install) would execute.
    ///
    /// Read-only: no lock is taken and nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or the store fails.
    pub async fn plan(&self, req: &ReleaseRequest<'_>) -> Result<PlanPreview> {
        let record = self.store.load_record(&req.key).await?;
        let next = record.as_ref().map_or(1, |r| r.last_revision + 1);
        let desired = self.render(req, next)?;

        let deployed = record.as_ref().and_then(ReleaseRecord::deployed);
        let empty = ManifestSet::empty();
        let previous = deployed.map_or(&empty, |r| &r.manifests);

        let diff = self.diff_engine.compute_diff(previous, &desired);
        let plan = DeploymentPlan::from_diff(&diff, &desired, &req.key, deployed.map(|r| r.number));
        Ok(PlanPreview { diff, plan })
    }

    /// Reports the live readiness of a release's resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the release does not exist or the cluster fails.
    pub async fn status(&self, key: &ReleaseKey) -> Result<ReleaseReport> {
        let record = self
            .store
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

        let manifests = &record.deployed().unwrap_or(latest).manifests;
        let mut resources = Vec::with_capacity(manifests.len());
        for resource in manifests {
            let live = self.cluster.get(&resource.id).await?;
            resources.push(ResourceReport {
                id: resource.id.clone(),
                weight: resource.weight,
                readiness: Readiness::assess(live.as_ref()),
            });
        }

        Ok(ReleaseReport {
            release: key.clone(),
            revision: latest.number,
            status: record.status().unwrap_or(latest.status),
            operation: latest.operation,
            description: latest.description.clone(),
            resources,
        })
    }

    /// Runs one apply attempt and records its outcome.
    ///
    /// The caller must hold the release lock.
    pub(crate) async fn apply_revision(&self, attempt: Attempt<'_>) -> Result<ReleaseOutcome> {
        let Attempt {
            key,
            operation,
            previous,
            base_revision,
            desired,
            values,
            bundle,
            description,
            reapply,
        } = attempt;

        info!("Starting {operation} of {key}");
        if let Some(pending) = operation.pending_status() {
            self.store.set_pending(key, pending).await?;
        }

        let diff = self.diff_engine.compute_diff(previous, &desired);
        let mut plan = DeploymentPlan::from_diff(&diff, &desired, key, base_revision);
        if reapply {
            plan.reapply_unchanged();
        }
        info!(
            "Plan for {key}: {} create, {} update, {} delete, {} unchanged",
            plan.create_count(),
            plan.update_count(),
            plan.delete_count(),
            plan.noop_count()
        );

        let found = self.store.get_deployed(key).await?.map(|r| r.number);
        if found != base_revision {
            self.store.clear_pending(key).await?;
            return Err(HalyardError::Plan(PlanError::DiffConflict {
                release: key.to_string(),
                expected: base_revision,
                found,
            }));
        }

        let result = PlanExecutor::new(self.cluster, &self.settings, &self.cancel)
            .execute(&plan)
            .await;

        let (status, manifests, description) = match &result.failure {
            None if operation == Operation::Uninstall => (ReleaseStatus::Uninstalled, desired, description),
            None => (ReleaseStatus::Deployed, desired, description),
            Some(failure) => {
                error!(resource = ?failure.resource(), "{operation} of {key} failed: {failure}");
                let attempted = if operation == Operation::Uninstall {
                    previous.clone()
                } else {
                    desired
                };
                (ReleaseStatus::Failed, attempted, failure.to_string())
            }
        };

        let revision = self
            .store
            .record(
                key,
                NewRevision::new(status, operation, manifests, values)
                    .with_bundle(bundle)
                    .with_description(description),
            )
            .await?;

        info!("{key} is now at revision {} ({status})", revision.number);
        Ok(ReleaseOutcome::new(key, operation, &revision, &plan, result))
    }
}

impl ReleaseOutcome {
    fn new(
        key: &ReleaseKey,
        operation: Operation,
        revision: &Revision,
        plan: &DeploymentPlan,
        result: ExecutionResult,
    ) -> Self {
        Self {
            release: key.clone(),
            operation,
            revision: revision.number,
            status: revision.status,
            base_revision: plan.base_revision,
            created: plan.create_count(),
            updated: plan.update_count(),
            deleted: plan.delete_count(),
            unchanged: plan.noop_count(),
            failure: result.failure,
            rollback: None,
        }
    }

    /// Returns true if the operation reached `deployed` or `uninstalled`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts a failed outcome into its error.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure.
    pub fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(failure) => Err(HalyardError::Reconcile(failure)),
            None => Ok(self),
        }
    }
}

/// Computes the manifest set that may currently be live for a release.
///
/// This is the deployed revision's set, overlaid with every failed attempt
/// recorded after it (most recent content wins). The flag is true when any
/// such failed attempt exists.
pub(crate) fn last_applied(record: &ReleaseRecord) -> Result<(ManifestSet, bool)> {
    let floor = record.settled_floor();

    let failed: Vec<&Revision> = record
        .revisions
        .iter()
        .rev()
        .filter(|r| r.number > floor && r.status == ReleaseStatus::Failed)
        .collect();

    let mut seen = BTreeSet::new();
    let mut resources = Vec::new();
    let deployed = record.deployed().map(|r| &r.manifests);
    for set in failed.iter().map(|r| &r.manifests).chain(deployed) {
        for resource in set {
            if seen.insert(resource.id.clone()) {
                resources.push(resource.clone());
            }
        }
    }

    Ok((ManifestSet::new(resources)?, !failed.is_empty()))
}

fn bundle_ref(bundle: &Bundle) -> BundleRef {
    BundleRef {
        name: bundle.metadata.name.clone(),
        version: bundle.metadata.version.clone(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{bundle, bundle_with_config, settings, values};
    use super::*;
    use crate::cluster::{ClusterEvent, Fault, InMemoryCluster};
    use crate::planner::ActionType;
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

    fn deployment_id() -> ResourceId {
        ResourceId::new("apps/v1", "Deployment", Some("default"), "web")
    }

    #[tokio::test]
    async fn test_install_scenario() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();

        let outcome = reconciler(&store, &cluster)
            .install(request(&bundle, 1, "app:v1"))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.revision, 1);
        assert_eq!(outcome.status, ReleaseStatus::Deployed);
        assert_eq!((outcome.created, outcome.updated, outcome.deleted), (2, 0, 0));

        let deployed = store.get_deployed(&key()).await.unwrap().unwrap();
        assert_eq!(deployed.number, 1);
        assert_eq!(deployed.manifests.len(), 2);

        let live = cluster.get(&deployment_id()).await.unwrap().unwrap();
        assert_eq!(live.content["spec"]["replicas"], json!(1));
        assert_eq!(
            live.content.pointer("/spec/template/spec/containers/0/image"),
            Some(&json!("app:v1"))
        );
    }

    #[tokio::test]
    async fn test_upgrade_scenario() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let outcome = r.upgrade(request(&bundle, 3, "app:v2"), false).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.revision, 2);
        assert_eq!(outcome.base_revision, Some(1));
        assert_eq!((outcome.created, outcome.updated, outcome.unchanged), (0, 1, 1));
        assert!(outcome.rollback.is_none());

        let live = cluster.get(&deployment_id()).await.unwrap().unwrap();
        assert_eq!(live.content["spec"]["replicas"], json!(3));
        assert_eq!(
            store.get_revision(&key(), 1).await.unwrap().status,
            ReleaseStatus::Superseded
        );
    }

    #[tokio::test]
    async fn test_install_rejected_when_deployed() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let err = r.install(request(&bundle, 1, "app:v1")).await.unwrap_err();
        assert!(matches!(err, HalyardError::Reconcile(ReconcileError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_upgrade_missing_release() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        let err = r.upgrade(request(&bundle, 1, "app:v1"), false).await.unwrap_err();
        assert!(err.is_not_found());

        let outcome = r.upgrade(request(&bundle, 1, "app:v1"), true).await.unwrap();
        assert_eq!(outcome.operation, Operation::Install);
        assert_eq!(outcome.revision, 1);
    }

    #[tokio::test]
    async fn test_render_failure_never_reaches_cluster() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let req = ReleaseRequest {
            key: key(),
            bundle: &bundle,
            values: Values::from_value(json!({"replicaCount": 1})).unwrap(),
        };

        let err = reconciler(&store, &cluster).install(req).await.unwrap_err();
        assert!(matches!(err, HalyardError::Render(_)));
        assert!(cluster.events().await.is_empty());
        assert!(store.load_record(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_install_records_failed_revision() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);
        let service = ResourceId::new("v1", "Service", Some("default"), "web");
        cluster
            .inject(service.clone(), Fault::RejectApply { remaining: None })
            .await;

        let outcome = r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.status, ReleaseStatus::Failed);
        assert!(store.get_deployed(&key()).await.unwrap().is_none());
        assert_eq!(store.release_status(&key()).await.unwrap(), ReleaseStatus::Failed);

        match outcome.clone().into_result().unwrap_err() {
            HalyardError::Reconcile(ReconcileError::ApplyFailure { resource, attempts, .. }) => {
                assert_eq!(resource, "Service/default/web");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        cluster.clear_fault(&service).await;
        let retry = r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        assert!(retry.is_success());
        assert_eq!(retry.revision, 2);
    }

    #[tokio::test]
    async fn test_failed_upgrade_rolls_back() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let v1 = bundle();
        let v2 = bundle_with_config();
        let r = reconciler(&store, &cluster);

        r.install(request(&v1, 1, "app:v1")).await.unwrap();
        let original = store.get_deployed(&key()).await.unwrap().unwrap();

        let config = ResourceId::new("v1", "ConfigMap", Some("default"), "web-config");
        cluster.inject(config, Fault::RejectApply { remaining: None }).await;

        let outcome = r.upgrade(request(&v2, 2, "app:v2"), false).await.unwrap();
        assert_eq!(outcome.revision, 2);
        assert_eq!(outcome.status, ReleaseStatus::Failed);
        assert_eq!(
            outcome.failure.as_ref().and_then(ReconcileError::resource),
            Some("ConfigMap/default/web-config")
        );

        let rollback = outcome.rollback.expect("automatic rollback");
        assert!(rollback.is_success());
        assert_eq!(rollback.operation, Operation::Rollback);
        assert_eq!(rollback.revision, 3);

        let deployed = store.get_deployed(&key()).await.unwrap().unwrap();
        assert_eq!(deployed.number, 3);
        assert_eq!(deployed.manifests, original.manifests);

        let statuses: Vec<ReleaseStatus> = store
            .history(&key(), 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![ReleaseStatus::Deployed, ReleaseStatus::Failed, ReleaseStatus::Superseded]
        );

        let live = cluster.get(&deployment_id()).await.unwrap().unwrap();
        assert_eq!(live.content["spec"]["replicas"], json!(1));
    }

    #[tokio::test]
    async fn test_cancelled_upgrade_is_recorded_without_rollback() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let cancel = CancelToken::new();
        let r = reconciler(&store, &cluster).with_cancel_token(cancel.clone());

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        cancel.cancel();
        let outcome = r.upgrade(request(&bundle, 2, "app:v2"), false).await.unwrap();

        assert_eq!(outcome.status, ReleaseStatus::Failed);
        assert!(matches!(outcome.failure, Some(ReconcileError::Cancelled { .. })));
        assert!(outcome.rollback.is_none());
        assert_eq!(store.get_deployed(&key()).await.unwrap().unwrap().number, 1);
    }

    #[tokio::test]
    async fn test_uninstall_deletes_in_descending_weight() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle_with_config();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let outcome = r.uninstall(&key()).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.status, ReleaseStatus::Uninstalled);
        assert_eq!((outcome.created, outcome.updated, outcome.deleted), (0, 0, 3));

        let deleted: Vec<String> = cluster
            .events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                ClusterEvent::Deleted(id) => Some(id.kind),
                ClusterEvent::Applied(_) => None,
            })
            .collect();
        assert_eq!(deleted, vec!["Deployment", "Service", "ConfigMap"]);
        assert!(cluster.objects().await.is_empty());
        assert!(store.get_deployed(&key()).await.unwrap().is_none());

        let err = r.uninstall(&key()).await.unwrap_err();
        assert!(matches!(err, HalyardError::Reconcile(ReconcileError::InvalidState { .. })));

        let reinstall = r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        assert_eq!(reinstall.revision, 3);
    }

    #[tokio::test]
    async fn test_plan_converges_after_upgrade() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let preview = r.plan(&request(&bundle, 3, "app:v2")).await.unwrap();
        assert_eq!(preview.plan.update_count(), 1);
        assert_eq!(preview.diff.updates, 1);

        r.upgrade(request(&bundle, 3, "app:v2"), false).await.unwrap();
        let after = r.plan(&request(&bundle, 3, "app:v2")).await.unwrap().plan;
        assert!(after.is_empty());
        assert!(after.actions.iter().all(|a| a.action_type == ActionType::Noop));
    }

    #[tokio::test]
    async fn test_identical_upgrade_is_all_noop() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();
        let applied = cluster.events().await.len();

        let outcome = r.upgrade(request(&bundle, 1, "app:v1"), false).await.unwrap();
        assert_eq!((outcome.created, outcome.updated, outcome.deleted, outcome.unchanged), (0, 0, 0, 2));
        assert_eq!(outcome.revision, 2);
        assert_eq!(cluster.events().await.len(), applied);
    }

    #[tokio::test]
    async fn test_concurrent_upgrades_serialize() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 1, "app:v1")).await.unwrap();

        let (a, b) = tokio::join!(
            r.upgrade(request(&bundle, 2, "app:v2"), false),
            r.upgrade(request(&bundle, 3, "app:v3"), false)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let (first, second) = if a.revision < b.revision { (a, b) } else { (b, a) };
        assert_eq!(first.revision, 2);
        assert_eq!(first.base_revision, Some(1));
        assert_eq!(second.revision, 3);
        assert_eq!(second.base_revision, Some(2));
    }

    #[tokio::test]
    async fn test_status_reports_readiness() {
        let (store, cluster) = (InMemoryReleaseStore::new(), InMemoryCluster::new());
        let bundle = bundle();
        let r = reconciler(&store, &cluster);

        r.install(request(&bundle, 2, "app:v1")).await.unwrap();
        let report = r.status(&key()).await.unwrap();

        assert_eq!(report.revision, 1);
        assert_eq!(report.status, ReleaseStatus::Deployed);
        assert_eq!(report.resources.len(), 2);
        assert!(report.resources.iter().all(|r| r.readiness.is_ready()));
    }
}
