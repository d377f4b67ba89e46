//! Rendered resources and manifest sets.
//!
//! A [`Resource`] is one concrete manifest produced by the renderer. Its
//! identity is `(kind, namespace, name)`; the `apiVersion` travels with the
//! identity so the cluster client can route requests, but it does not take
//! part in equality or ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::RenderError;

use super::hash::ContentHasher;

/// Annotation that overrides the kind-derived weight.
pub const WEIGHT_ANNOTATION: &str = "halyard.io/weight";

/// Weight assigned to kinds we know nothing about.
pub const DEFAULT_WEIGHT: i32 = 90;

/// Kinds that live outside any namespace.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "IngressClass",
    "APIService",
];

/// Kinds whose readiness is measured by replica counts.
pub const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "ReplicaSet", "DaemonSet"];

/// Identity of a resource within a manifest set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceId {
    /// API version used to route requests (not part of the identity).
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Resource kind.
    pub kind: String,
    /// Namespace, `None` for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resource name.
    pub name: String,
}

/// A concrete rendered resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity key.
    pub id: ResourceId,
    /// Ordering weight; lower weights are applied first.
    pub weight: i32,
    /// SHA-256 of the canonical manifest content.
    pub digest: String,
    /// Full manifest.
    pub content: Value,
}

/// An ordered, duplicate-free set of resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Resource>", into = "Vec<Resource>")]
pub struct ManifestSet {
    resources: Vec<Resource>,
}

impl ResourceId {
    /// Creates a resource identity.
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }

    /// Returns true if this identity refers to a replica-managed workload.
    #[must_use]
    pub fn is_workload(&self) -> bool {
        WORKLOAD_KINDS.contains(&self.kind.as_str())
    }

    fn key(&self) -> (&str, Option<&str>, &str) {
        (&self.kind, self.namespace.as_deref(), &self.name)
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{ns}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Returns true if the kind is cluster-scoped.
#[must_use]
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Returns the default apply weight for a kind.
///
/// Prerequisites get low weights so they exist before their dependents.
#[must_use]
pub fn weight_for_kind(kind: &str) -> i32 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 10,
        "ResourceQuota" | "LimitRange" | "NetworkPolicy" | "PodDisruptionBudget"
        | "PriorityClass" => 20,
        "ServiceAccount" | "Role" | "RoleBinding" | "ClusterRole" | "ClusterRoleBinding" => 30,
        "Secret" | "ConfigMap" | "StorageClass" | "PersistentVolume"
        | "PersistentVolumeClaim" => 40,
        "Service" => 50,
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => 60,
        "HorizontalPodAutoscaler" | "IngressClass" | "Ingress" | "APIService" => 70,
        "Job" | "CronJob" => 80,
        _ => DEFAULT_WEIGHT,
    }
}

impl Resource {
    /// Builds a resource from a parsed manifest document.
    ///
    /// Namespaced kinds without `metadata.namespace` are placed in
    /// `default_namespace`, and the namespace is written back into the
    /// content so the digest reflects where the object really lives.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind`, `apiVersion` or `metadata.name` is missing,
    /// or the weight annotation is not an integer.
    pub fn from_manifest(
        mut content: Value,
        default_namespace: &str,
        template: &str,
    ) -> std::result::Result<Self, RenderError> {
        let Some(object) = content.as_object() else {
            return Err(RenderError::invalid_manifest(template, "document is not a mapping"));
        };

        let kind = string_field(object.get("kind"))
            .ok_or_else(|| RenderError::invalid_manifest(template, "missing 'kind'"))?;
        let api_version = string_field(object.get("apiVersion")).ok_or_else(|| {
            RenderError::invalid_manifest(template, format!("{kind} is missing 'apiVersion'"))
        })?;
        let metadata = object.get("metadata").and_then(Value::as_object);
        let name = metadata
            .and_then(|m| string_field(m.get("name")))
            .ok_or_else(|| {
                RenderError::invalid_manifest(template, format!("{kind} is missing 'metadata.name'"))
            })?;

        let weight = match metadata
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(WEIGHT_ANNOTATION))
        {
            Some(raw) => parse_weight(raw).ok_or_else(|| {
                RenderError::invalid_manifest(
                    template,
                    format!("{kind}/{name}: annotation {WEIGHT_ANNOTATION} must be an integer"),
                )
            })?,
            None => weight_for_kind(&kind),
        };

        let namespace = if is_cluster_scoped(&kind) {
            None
        } else {
            let ns = metadata
                .and_then(|m| string_field(m.get("namespace")))
                .unwrap_or_else(|| default_namespace.to_string());
            if let Some(meta) = content.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert(String::from("namespace"), Value::String(ns.clone()));
            }
            Some(ns)
        };

        let digest = ContentHasher::new().digest(&content);

        Ok(Self {
            id: ResourceId {
                api_version,
                kind,
                namespace,
                name,
            },
            weight,
            digest,
            content,
        })
    }

    /// Returns the desired replica count for workloads (defaults to 1).
    #[must_use]
    pub fn desired_replicas(&self) -> Option<u64> {
        if !self.id.is_workload() || self.id.kind == "DaemonSet" {
            return None;
        }
        Some(
            self.content
                .pointer("/spec/replicas")
                .and_then(Value::as_u64)
                .unwrap_or(1),
        )
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

fn parse_weight(raw: &Value) -> Option<i32> {
    match raw {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ManifestSet {
    /// Creates a manifest set, rejecting duplicate identities.
    ///
    /// Resources are sorted by `(weight, identity)`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DuplicateResource`] if two resources share an identity.
    pub fn new(mut resources: Vec<Resource>) -> std::result::Result<Self, RenderError> {
        let mut seen = HashSet::with_capacity(resources.len());
        for resource in &resources {
            if !seen.insert(&resource.id) {
                return Err(RenderError::DuplicateResource {
                    resource: resource.id.to_string(),
                });
            }
        }

        resources.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { resources })
    }

    /// Creates an empty manifest set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    /// Returns the number of resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the set has no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterates resources in apply order.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    /// Looks up a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    /// Returns the resources keyed by identity.
    #[must_use]
    pub fn by_id(&self) -> BTreeMap<&ResourceId, &Resource> {
        self.resources.iter().map(|r| (&r.id, r)).collect()
    }

    /// Returns a digest covering every resource in the set.
    #[must_use]
    pub fn digest(&self) -> String {
        ContentHasher::new().digest_all(self.resources.iter().map(|r| r.digest.as_str()))
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

impl TryFrom<Vec<Resource>> for ManifestSet {
    type Error = RenderError;

    fn try_from(resources: Vec<Resource>) -> std::result::Result<Self, Self::Error> {
        Self::new(resources)
    }
}

impl From<ManifestSet> for Vec<Resource> {
    fn from(set: ManifestSet) -> Self {
        set.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(kind: &str, name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}})
    }

    #[test]
    fn test_identity_ignores_api_version() {
        let a = ResourceId::new("apps/v1", "Deployment", Some("default"), "web");
        let b = ResourceId::new("apps/v1beta1", "Deployment", Some("default"), "web");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Deployment/default/web");
    }

    #[test]
    fn test_default_namespace_applied() {
        let resource = Resource::from_manifest(manifest("Service", "web"), "prod", "svc.yaml")
            .expect("valid manifest");
        assert_eq!(resource.id.namespace.as_deref(), Some("prod"));
        assert_eq!(resource.content["metadata"]["namespace"], "prod");
        assert_eq!(resource.weight, 50);
    }

    #[test]
    fn test_cluster_scoped_has_no_namespace() {
        let resource = Resource::from_manifest(manifest("Namespace", "monitoring"), "prod", "ns.yaml")
            .expect("valid manifest");
        assert!(resource.id.namespace.is_none());
        assert_eq!(resource.weight, 0);
        assert_eq!(resource.id.to_string(), "Namespace/monitoring");
    }

    #[test]
    fn test_weight_annotation_overrides_kind() {
        let content = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "late", "annotations": {WEIGHT_ANNOTATION: "75"}}
        });
        let resource = Resource::from_manifest(content, "default", "cm.yaml").expect("valid");
        assert_eq!(resource.weight, 75);
    }

    #[test]
    fn test_missing_name_rejected() {
        let content = json!({"apiVersion": "v1", "kind": "Service", "metadata": {}});
        let err = Resource::from_manifest(content, "default", "svc.yaml").unwrap_err();
        assert!(matches!(err, RenderError::InvalidManifest { .. }));
    }

    #[test]
    fn test_manifest_set_rejects_duplicates() {
        let a = Resource::from_manifest(manifest("Service", "web"), "default", "a.yaml").unwrap();
        let b = Resource::from_manifest(manifest("Service", "web"), "default", "b.yaml").unwrap();

        let err = ManifestSet::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, RenderError::DuplicateResource { resource } if resource == "Service/default/web"));
    }

    #[test]
    fn test_manifest_set_sorted_by_weight() {
        let svc = Resource::from_manifest(manifest("Service", "web"), "default", "a.yaml").unwrap();
        let ns = Resource::from_manifest(manifest("Namespace", "default"), "default", "b.yaml").unwrap();
        let cm = Resource::from_manifest(manifest("ConfigMap", "cfg"), "default", "c.yaml").unwrap();

        let set = ManifestSet::new(vec![svc, ns, cm]).unwrap();
        let kinds: Vec<&str> = set.iter().map(|r| r.id.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Service"]);
    }

    #[test]
    fn test_desired_replicas() {
        let content = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3}
        });
        let resource = Resource::from_manifest(content, "default", "d.yaml").unwrap();
        assert_eq!(resource.desired_replicas(), Some(3));
    }
}
