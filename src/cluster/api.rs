//! Cluster API seam.
//!
//! The reconciler only needs four verbs from a cluster: apply a manifest,
//! delete an object, read an object back, and name the backend. Everything
//! else (server-side apply, retries at the transport level, auth) belongs to
//! the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::render::{Resource, ResourceId};

/// An object as it currently exists in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveObject {
    /// Identity of the object.
    pub id: ResourceId,
    /// Full object including server-populated `status`.
    pub content: Value,
}

/// Trait for cluster API backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Creates or updates an object to match `resource`.
    ///
    /// Returns the object as stored by the cluster.
    async fn apply(&self, resource: &Resource) -> Result<LiveObject>;

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ClusterError::NotFound`] if the object does not exist.
    async fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Reads an object back. Returns `None` if it does not exist.
    async fn get(&self, id: &ResourceId) -> Result<Option<LiveObject>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl ClusterApi for Box<dyn ClusterApi> {
    async fn apply(&self, resource: &Resource) -> Result<LiveObject> {
        (**self).apply(resource).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        (**self).delete(id).await
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<LiveObject>> {
        (**self).get(id).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
