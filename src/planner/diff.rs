//! Diff engine for comparing two manifest sets.
//!
//! This module computes the difference between the manifest set of the
//! previously deployed revision and a newly rendered one. Identity is the
//! `(kind, namespace, name)` key; content is compared by digest.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::render::{ManifestSet, Resource, ResourceId};

/// Maximum number of field details collected per resource.
const MAX_DETAILS: usize = 20;

/// Engine for computing diffs between manifest sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Resource identity.
    pub id: ResourceId,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Ordering weight (new weight, or previous weight for deletes).
    pub weight: i32,
    /// Changed fields (updates only).
    pub details: Vec<DiffDetail>,
    /// Previous digest (if applicable).
    pub old_digest: Option<String>,
    /// New digest (if applicable).
    pub new_digest: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Dotted path of the field that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    /// All resource diffs, in identity order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff from `previous` to `desired`.
    ///
    /// An empty `previous` (first install) never yields deletes; an empty
    /// `desired` (uninstall) yields only deletes.
    #[must_use]
    pub fn compute_diff(&self, previous: &ManifestSet, desired: &ManifestSet) -> DiffResult {
        let old_by_id = previous.by_id();
        let new_by_id = desired.by_id();
        let mut diffs = Vec::with_capacity(old_by_id.len().max(new_by_id.len()));

        for (id, new) in &new_by_id {
            let diff = match old_by_id.get(id) {
                None => {
                    debug!("{id} needs to be created");
                    ResourceDiff {
                        id: (*id).clone(),
                        diff_type: DiffType::Create,
                        weight: new.weight,
                        details: vec![],
                        old_digest: None,
                        new_digest: Some(new.digest.clone()),
                    }
                }
                Some(old) if old.digest == new.digest => ResourceDiff {
                    id: (*id).clone(),
                    diff_type: DiffType::NoChange,
                    weight: new.weight,
                    details: vec![],
                    old_digest: Some(old.digest.clone()),
                    new_digest: Some(new.digest.clone()),
                },
                Some(old) => {
                    debug!("{id} needs update");
                    ResourceDiff {
                        id: (*id).clone(),
                        diff_type: DiffType::Update,
                        weight: new.weight,
                        details: Self::compute_detailed_diff(old, new),
                        old_digest: Some(old.digest.clone()),
                        new_digest: Some(new.digest.clone()),
                    }
                }
            };
            diffs.push(diff);
        }

        for (id, old) in &old_by_id {
            if !new_by_id.contains_key(id) {
                debug!("{id} is no longer rendered");
                diffs.push(ResourceDiff {
                    id: (*id).clone(),
                    diff_type: DiffType::Delete,
                    weight: old.weight,
                    details: vec![],
                    old_digest: Some(old.digest.clone()),
                    new_digest: None,
                });
            }
        }

        diffs.sort_by(|a, b| a.id.cmp(&b.id));

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        DiffResult {
            diffs,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }

    /// Lists the leaf fields that differ between two versions of a resource.
    fn compute_detailed_diff(old: &Resource, new: &Resource) -> Vec<DiffDetail> {
        let mut details = Vec::new();
        collect_changes("", &old.content, &new.content, &mut details);
        if old.weight != new.weight {
            details.push(DiffDetail {
                field: String::from("(weight)"),
                old_value: Some(old.weight.to_string()),
                new_value: Some(new.weight.to_string()),
            });
        }
        details.truncate(MAX_DETAILS);
        details
    }
}

fn collect_changes(path: &str, old: &Value, new: &Value, out: &mut Vec<DiffDetail>) {
    if old == new || out.len() >= MAX_DETAILS {
        return;
    }

    if let (Value::Object(a), Value::Object(b)) = (old, new) {
        let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            match (a.get(key), b.get(key)) {
                (Some(x), Some(y)) => collect_changes(&child, x, y, out),
                (x, y) => out.push(DiffDetail {
                    field: child,
                    old_value: x.map(render_value),
                    new_value: y.map(render_value),
                }),
            }
        }
        return;
    }

    out.push(DiffDetail {
        field: if path.is_empty() { String::from("(root)") } else { path.to_string() },
        old_value: Some(render_value(old)),
        new_value: Some(render_value(new)),
    });
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(kind: &str, name: &str, spec: Value) -> Resource {
        Resource::from_manifest(
            json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}, "spec": spec}),
            "default",
            "test.yaml",
        )
        .unwrap()
    }

    fn set(resources: Vec<Resource>) -> ManifestSet {
        ManifestSet::new(resources).unwrap()
    }

    #[test]
    fn test_first_install_is_all_create() {
        let desired = set(vec![
            resource("Service", "web", json!({})),
            resource("Deployment", "web", json!({"replicas": 1})),
        ]);
        let diff = DiffEngine::new().compute_diff(&ManifestSet::empty(), &desired);
        assert_eq!(diff.creates, 2);
        assert_eq!(diff.total_changes(), 2);
        assert_eq!(diff.deletes, 0);
    }

    #[test]
    fn test_identical_sets_are_noop() {
        let a = set(vec![
            resource("Service", "web", json!({})),
            resource("Deployment", "web", json!({"replicas": 1})),
        ]);
        let diff = DiffEngine::new().compute_diff(&a, &a.clone());
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged, 2);
    }

    #[test]
    fn test_update_details() {
        let old = set(vec![resource("Deployment", "web", json!({"replicas": 1, "image": "app:v1"}))]);
        let new = set(vec![resource("Deployment", "web", json!({"replicas": 3, "image": "app:v1"}))]);

        let diff = DiffEngine::new().compute_diff(&old, &new);
        assert_eq!(diff.updates, 1);
        assert_eq!(
            diff.diffs[0].details,
            vec![DiffDetail {
                field: String::from("spec.replicas"),
                old_value: Some(String::from("1")),
                new_value: Some(String::from("3")),
            }]
        );
    }

    #[test]
    fn test_empty_desired_is_all_delete() {
        let old = set(vec![
            resource("ConfigMap", "cfg", json!({})),
            resource("Deployment", "web", json!({})),
        ]);
        let diff = DiffEngine::new().compute_diff(&old, &ManifestSet::empty());
        assert_eq!(diff.deletes, 2);
        assert!(diff.diffs.iter().all(|d| d.diff_type == DiffType::Delete));
    }

    #[test]
    fn test_mixed_changes() {
        let old = set(vec![
            resource("ConfigMap", "old", json!({})),
            resource("Service", "web", json!({})),
        ]);
        let new = set(vec![
            resource("Service", "web", json!({})),
            resource("Deployment", "web", json!({})),
        ]);
        let diff = DiffEngine::new().compute_diff(&old, &new);
        assert_eq!((diff.creates, diff.updates, diff.deletes, diff.unchanged), (1, 0, 1, 1));
        assert_eq!(diff.actionable_diffs().len(), 2);
    }
}
