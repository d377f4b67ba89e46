//! Readiness assessment for live objects.
//!
//! Workloads are ready once their ready replica count reaches the desired
//! count; every other kind is ready as soon as it exists.

use serde::Serialize;
use serde_json::Value;

use super::api::LiveObject;

/// Readiness of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Readiness {
    /// The object exists and has converged.
    Ready,
    /// The object exists but has not converged yet.
    Pending(String),
    /// The object does not exist.
    Missing,
}

impl Readiness {
    /// Assesses a live object (or its absence).
    #[must_use]
    pub fn assess(live: Option<&LiveObject>) -> Self {
        let Some(live) = live else {
            return Self::Missing;
        };

        let content = &live.content;
        match live.id.kind.as_str() {
            "Deployment" | "StatefulSet" | "ReplicaSet" => {
                let desired = count(content, "/spec/replicas").unwrap_or(1);
                let ready = count(content, "/status/readyReplicas").unwrap_or(0);
                if ready >= desired {
                    Self::Ready
                } else {
                    Self::Pending(format!("{ready}/{desired} replicas ready"))
                }
            }
            "DaemonSet" => {
                let desired = count(content, "/status/desiredNumberScheduled").unwrap_or(0);
                let ready = count(content, "/status/numberReady").unwrap_or(0);
                if desired > 0 && ready >= desired {
                    Self::Ready
                } else {
                    Self::Pending(format!("{ready}/{desired} pods ready"))
                }
            }
            _ => Self::Ready,
        }
    }

    /// Returns true if the object is ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Human-readable detail.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Ready => String::from("ready"),
            Self::Pending(detail) => detail.clone(),
            Self::Missing => String::from("not found"),
        }
    }
}

fn count(content: &Value, pointer: &str) -> Option<u64> {
    content.pointer(pointer).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ResourceId;
    use serde_json::json;

    fn live(kind: &str, content: Value) -> LiveObject {
        LiveObject {
            id: ResourceId::new("apps/v1", kind, Some("default"), "web"),
            content,
        }
    }

    #[test]
    fn test_deployment_readiness() {
        let pending = live("Deployment", json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 1}}));
        assert_eq!(
            Readiness::assess(Some(&pending)),
            Readiness::Pending(String::from("1/3 replicas ready"))
        );

        let ready = live("Deployment", json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 3}}));
        assert!(Readiness::assess(Some(&ready)).is_ready());
    }

    #[test]
    fn test_replicas_default_to_one() {
        let obj = live("StatefulSet", json!({"spec": {}, "status": {}}));
        assert!(!Readiness::assess(Some(&obj)).is_ready());
    }

    #[test]
    fn test_daemonset_readiness() {
        let obj = live(
            "DaemonSet",
            json!({"status": {"desiredNumberScheduled": 2, "numberReady": 2}}),
        );
        assert!(Readiness::assess(Some(&obj)).is_ready());
    }

    #[test]
    fn test_non_workload_ready_when_present() {
        let obj = live("Service", json!({}));
        assert!(Readiness::assess(Some(&obj)).is_ready());
        assert_eq!(Readiness::assess(None), Readiness::Missing);
    }
}
