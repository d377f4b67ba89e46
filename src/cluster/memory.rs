//! In-memory cluster.
//!
//! Stores objects in a map and reports workloads as ready immediately after
//! apply. Faults can be injected per resource to exercise retry, readiness
//! timeout and rollback paths. With a snapshot path the object map is
//! persisted as JSON after every mutation, which gives the CLI a local
//! cluster that survives between invocations.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClusterError, HalyardError, Result};
use crate::render::{Resource, ResourceId};

use super::api::{ClusterApi, LiveObject};

/// A fault injected for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reject applies. `Some(n)` rejects the next `n` attempts, `None` rejects forever.
    RejectApply {
        /// Remaining rejections.
        remaining: Option<u32>,
    },
    /// Accept applies but never report the workload as ready.
    NeverReady,
    /// Reject deletes.
    RejectDelete,
}

/// A mutation observed by the cluster, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// An object was created or updated.
    Applied(ResourceId),
    /// An object was deleted.
    Deleted(ResourceId),
}

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ResourceId, LiveObject>,
    faults: HashMap<ResourceId, Fault>,
    events: Vec<ClusterEvent>,
    apply_attempts: HashMap<ResourceId, u32>,
}

/// In-memory cluster backend.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    snapshot: Option<PathBuf>,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cluster persisted at `path`, loading existing objects.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = ClusterState::default();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let objects: Vec<LiveObject> = serde_json::from_str(&raw).map_err(|e| {
                HalyardError::Cluster(ClusterError::InvalidResponse {
                    message: format!("Invalid cluster snapshot {}: {e}", path.display()),
                })
            })?;
            debug!("Loaded {} object(s) from {}", objects.len(), path.display());
            state.objects = objects.into_iter().map(|o| (o.id.clone(), o)).collect();
        }

        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(path),
        })
    }

    /// Injects a fault for a resource, replacing any previous one.
    pub async fn inject(&self, id: ResourceId, fault: Fault) {
        self.state.lock().await.faults.insert(id, fault);
    }

    /// Removes the fault for a resource.
    pub async fn clear_fault(&self, id: &ResourceId) {
        self.state.lock().await.faults.remove(id);
    }

    /// Returns the ordered mutation log.
    pub async fn events(&self) -> Vec<ClusterEvent> {
        self.state.lock().await.events.clone()
    }

    /// Returns how many times an apply was attempted for a resource.
    pub async fn apply_attempts(&self, id: &ResourceId) -> u32 {
        self.state
            .lock()
            .await
            .apply_attempts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns every stored object in identity order.
    pub async fn objects(&self) -> Vec<LiveObject> {
        self.state.lock().await.objects.values().cloned().collect()
    }

    async fn persist(&self, state: &ClusterState) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let objects: Vec<&LiveObject> = state.objects.values().collect();
        let content = serde_json::to_string_pretty(&objects)
            .map_err(|e| HalyardError::internal(format!("Failed to serialize cluster snapshot: {e}")))?;
        write_snapshot(path, content.as_bytes()).await
    }
}

async fn write_snapshot(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, content).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

/// Fills in the `status` a healthy controller would report.
fn converged_status(resource: &Resource, ready: bool) -> Value {
    match resource.id.kind.as_str() {
        "DaemonSet" => {
            let ready_count = u64::from(ready);
            json!({"desiredNumberScheduled": 1, "numberReady": ready_count})
        }
        _ => match resource.desired_replicas() {
            Some(replicas) => {
                let ready_count = if ready { replicas } else { 0 };
                json!({"replicas": replicas, "readyReplicas": ready_count})
            }
            None => json!({}),
        },
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn apply(&self, resource: &Resource) -> Result<LiveObject> {
        let mut state = self.state.lock().await;
        *state.apply_attempts.entry(resource.id.clone()).or_insert(0) += 1;

        let mut never_ready = false;
        match state.faults.get_mut(&resource.id) {
            Some(Fault::RejectApply { remaining: None }) => {
                return Err(ClusterError::rejected(resource.id.to_string(), 422, "rejected by admission").into());
            }
            Some(Fault::RejectApply { remaining: Some(n) }) if *n > 0 => {
                *n -= 1;
                return Err(ClusterError::rejected(resource.id.to_string(), 422, "rejected by admission").into());
            }
            Some(Fault::NeverReady) => never_ready = true,
            _ => {}
        }

        let mut content = resource.content.clone();
        if let Some(object) = content.as_object_mut() {
            object.insert(String::from("status"), converged_status(resource, !never_ready));
        }

        let live = LiveObject {
            id: resource.id.clone(),
            content,
        };
        state.objects.insert(resource.id.clone(), live.clone());
        state.events.push(ClusterEvent::Applied(resource.id.clone()));
        debug!("Applied {}", resource.id);

        self.persist(&state).await?;
        Ok(live)
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.faults.get(id) == Some(&Fault::RejectDelete) {
            return Err(ClusterError::rejected(id.to_string(), 409, "deletion refused").into());
        }

        if state.objects.remove(id).is_none() {
            return Err(ClusterError::NotFound {
                resource: id.to_string(),
            }
            .into());
        }
        state.events.push(ClusterEvent::Deleted(id.clone()));
        debug!("Deleted {id}");

        if let Err(e) = self.persist(&state).await {
            warn!("Failed to persist cluster snapshot: {e}");
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<LiveObject>> {
        Ok(self.state.lock().await.objects.get(id).cloned())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Readiness;
    use tempfile::TempDir;

    fn deployment(name: &str, replicas: u64) -> Resource {
        Resource::from_manifest(
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name},
                "spec": {"replicas": replicas}
            }),
            "default",
            "deployment.yaml",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_get_delete() {
        let cluster = InMemoryCluster::new();
        let web = deployment("web", 2);

        let live = cluster.apply(&web).await.unwrap();
        assert_eq!(live.content["status"]["readyReplicas"], json!(2));
        assert!(Readiness::assess(cluster.get(&web.id).await.unwrap().as_ref()).is_ready());

        cluster.delete(&web.id).await.unwrap();
        assert!(cluster.get(&web.id).await.unwrap().is_none());

        let err = cluster.delete(&web.id).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(
            cluster.events().await,
            vec![ClusterEvent::Applied(web.id.clone()), ClusterEvent::Deleted(web.id.clone())]
        );
    }

    #[tokio::test]
    async fn test_reject_apply_counts_down() {
        let cluster = InMemoryCluster::new();
        let web = deployment("web", 1);
        cluster
            .inject(web.id.clone(), Fault::RejectApply { remaining: Some(2) })
            .await;

        assert!(cluster.apply(&web).await.is_err());
        assert!(cluster.apply(&web).await.is_err());
        assert!(cluster.apply(&web).await.is_ok());
        assert_eq!(cluster.apply_attempts(&web.id).await, 3);
    }

    #[tokio::test]
    async fn test_never_ready() {
        let cluster = InMemoryCluster::new();
        let web = deployment("web", 1);
        cluster.inject(web.id.clone(), Fault::NeverReady).await;

        cluster.apply(&web).await.unwrap();
        let readiness = Readiness::assess(cluster.get(&web.id).await.unwrap().as_ref());
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.json");
        let web = deployment("web", 1);

        {
            let cluster = InMemoryCluster::with_snapshot(&path).unwrap();
            cluster.apply(&web).await.unwrap();
        }

        let reopened = InMemoryCluster::with_snapshot(&path).unwrap();
        assert!(reopened.get(&web.id).await.unwrap().is_some());
    }
}
