//! Plan executor for applying deployment plans.
//!
//! This module runs a plan against the cluster one tier at a time. Actions
//! within a tier run concurrently; a tier must fully succeed before the
//! next one starts. Each action retries with bounded exponential backoff and
//! then waits for readiness (or, for deletes, for the object to disappear).

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterApi, Readiness};
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::render::ResourceId;

use super::plan::{ActionType, DeploymentPlan, Phase, PlannedAction};

/// Timing and retry settings for plan execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Attempts per action before giving up.
    pub max_attempts: u32,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
    /// How long to wait for an object to become ready (or disappear).
    pub readiness_timeout: Duration,
    /// Delay between readiness polls.
    pub poll_interval: Duration,
}

/// Cooperative cancellation flag, checked between tiers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

/// Executor for deployment plans.
#[derive(Debug)]
pub struct PlanExecutor<'a, C: ClusterApi + ?Sized> {
    /// Cluster to apply against.
    cluster: &'a C,
    /// Retry and timeout settings.
    settings: &'a ExecutorSettings,
    /// Cancellation flag.
    cancel: &'a CancelToken,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Action that was executed.
    pub action: PlannedAction,
    /// Whether the action succeeded.
    pub success: bool,
    /// Attempts made.
    pub attempts: u32,
    /// Error (if failed).
    pub error: Option<ReconcileError>,
}

/// Result of executing the entire plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Individual action results, in execution order.
    pub results: Vec<ActionResult>,
    /// Number of tiers in the plan.
    pub tiers_total: usize,
    /// Number of tiers that fully succeeded.
    pub tiers_completed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of actions never started.
    pub skipped: usize,
    /// Whether the run stopped because of cancellation.
    pub cancelled: bool,
    /// First failure, if any.
    pub failure: Option<ReconcileError>,
}

enum AttemptError {
    /// The cluster refused the mutation; retried.
    Mutation(String),
    /// The object never converged; not retried.
    NotConverged(String),
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for ExecutorSettings {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            readiness_timeout: Duration::from_secs(config.readiness_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl ExecutorSettings {
    /// Delay before retrying after the given (1-based) failed attempt:
    /// `base * 2^(attempt - 1)`, capped at the maximum.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Takes effect before the next tier starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ExecutionResult {
    /// Returns true if every tier completed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failure.is_none()
    }
}

impl<'a, C: ClusterApi + ?Sized> PlanExecutor<'a, C> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(cluster: &'a C, settings: &'a ExecutorSettings, cancel: &'a CancelToken) -> Self {
        Self {
            cluster,
            settings,
            cancel,
        }
    }

    /// Executes a deployment plan.
    ///
    /// Never returns early with an error: failures and cancellation are
    /// reported in the [`ExecutionResult`] so the caller can record them.
    pub async fn execute(&self, plan: &DeploymentPlan) -> ExecutionResult {
        let tiers = plan.tiers();
        let mut result = ExecutionResult {
            tiers_total: tiers.len(),
            ..ExecutionResult::default()
        };

        info!(
            "Executing plan for {} with {} tier(s)",
            plan.release,
            tiers.len()
        );

        for (index, tier) in tiers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancellation requested, stopping before tier {}", index + 1);
                result.cancelled = true;
                result.failure = Some(ReconcileError::Cancelled {
                    completed_tiers: index,
                });
                result.skipped = tiers[index..].iter().map(|t| t.actions.len()).sum();
                break;
            }

            info!(
                "Tier {}/{}: {} weight {} ({} action(s))",
                index + 1,
                tiers.len(),
                match tier.phase {
                    Phase::Apply => "apply",
                    Phase::Delete => "delete",
                },
                tier.weight,
                tier.actions.len()
            );

            let outcomes = join_all(tier.actions.iter().map(|action| self.execute_action(action))).await;

            let mut tier_failed = false;
            for outcome in outcomes {
                if outcome.success {
                    result.successful += 1;
                } else {
                    result.failed += 1;
                    tier_failed = true;
                    if result.failure.is_none() {
                        result.failure.clone_from(&outcome.error);
                    }
                }
                result.results.push(outcome);
            }

            if tier_failed {
                result.skipped = tiers[index + 1..].iter().map(|t| t.actions.len()).sum();
                if let Some(failure) = &result.failure {
                    error!("Aborting plan: {failure}");
                }
                break;
            }
            result.tiers_completed += 1;
        }

        result
    }

    /// Executes a single action with retries.
    async fn execute_action(&self, action: &PlannedAction) -> ActionResult {
        info!("Executing: {}", action.description());

        let mut attempts = 0;
        loop {
            attempts += 1;

            let outcome = match action.action_type {
                ActionType::Create | ActionType::Update => self.apply_once(action).await,
                ActionType::Delete => self.delete_once(&action.id).await,
                ActionType::Noop => Ok(()),
            };

            let error = match outcome {
                Ok(()) => {
                    debug!("{} succeeded after {attempts} attempt(s)", action.description());
                    return ActionResult {
                        action: action.clone(),
                        success: true,
                        attempts,
                        error: None,
                    };
                }
                Err(AttemptError::NotConverged(detail)) => ReconcileError::ReadinessTimeout {
                    resource: action.id.to_string(),
                    timeout_secs: self.settings.readiness_timeout.as_secs(),
                    detail,
                },
                Err(AttemptError::Mutation(cause)) if attempts < self.settings.max_attempts => {
                    let delay = self.settings.backoff_delay(attempts);
                    warn!(
                        "{} failed (attempt {attempts}/{}): {cause}; retrying in {delay:?}",
                        action.description(),
                        self.settings.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(AttemptError::Mutation(cause)) => ReconcileError::ApplyFailure {
                    resource: action.id.to_string(),
                    cause,
                    attempts,
                },
            };

            error!("{} failed: {error}", action.description());
            return ActionResult {
                action: action.clone(),
                success: false,
                attempts,
                error: Some(error),
            };
        }
    }

    async fn apply_once(&self, action: &PlannedAction) -> Result<(), AttemptError> {
        let Some(resource) = &action.resource else {
            return Err(AttemptError::Mutation(String::from("no desired content for resource")));
        };

        self.cluster
            .apply(resource)
            .await
            .map_err(|e| AttemptError::Mutation(e.to_string()))?;

        self.wait_until(&action.id, |readiness| match readiness {
            Readiness::Ready => None,
            other => Some(other.detail()),
        })
        .await
    }

    async fn delete_once(&self, id: &ResourceId) -> Result<(), AttemptError> {
        match self.cluster.delete(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("{id} was already deleted");
            }
            Err(e) => return Err(AttemptError::Mutation(e.to_string())),
        }

        self.wait_until(id, |readiness| match readiness {
            Readiness::Missing => None,
            _ => Some(String::from("still present")),
        })
        .await
    }

    /// Polls `id` until `pending` returns `None` or the readiness timeout passes.
    async fn wait_until<F>(&self, id: &ResourceId, pending: F) -> Result<(), AttemptError>
    where
        F: Fn(&Readiness) -> Option<String>,
    {
        let deadline = Instant::now() + self.settings.readiness_timeout;

        loop {
            let detail = match self.cluster.get(id).await {
                Ok(live) => match pending(&Readiness::assess(live.as_ref())) {
                    None => return Ok(()),
                    Some(detail) => detail,
                },
                Err(e) => format!("status check failed: {e}"),
            };

            if Instant::now() >= deadline {
                return Err(AttemptError::NotConverged(detail));
            }
            debug!("Waiting for {id}: {detail}");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterEvent, Fault, InMemoryCluster, LiveObject, MockClusterApi};
    use crate::error::ClusterError;
    use crate::planner::DiffEngine;
    use crate::render::{ManifestSet, Resource};
    use crate::state::ReleaseKey;
    use serde_json::json;

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            readiness_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn resource(kind: &str, name: &str) -> Resource {
        Resource::from_manifest(
            json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}, "spec": {}}),
            "default",
            "test.yaml",
        )
        .unwrap()
    }

    fn plan(previous: &ManifestSet, desired: &ManifestSet) -> DeploymentPlan {
        let diff = DiffEngine::new().compute_diff(previous, desired);
        DeploymentPlan::from_diff(&diff, desired, &ReleaseKey::new("default", "web"), None)
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let settings = ExecutorSettings {
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(3),
            ..ExecutorSettings::default()
        };
        assert_eq!(settings.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(settings.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(settings.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(settings.backoff_delay(4), Duration::from_secs(3));
        assert_eq!(settings.backoff_delay(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_applies_in_tier_order() {
        let cluster = InMemoryCluster::new();
        let desired = ManifestSet::new(vec![
            resource("Deployment", "web"),
            resource("Service", "web"),
            resource("Namespace", "apps"),
        ])
        .unwrap();

        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(result.success());
        assert_eq!(result.tiers_completed, 3);
        let kinds: Vec<String> = cluster
            .events()
            .await
            .into_iter()
            .map(|e| match e {
                ClusterEvent::Applied(id) | ClusterEvent::Deleted(id) => id.kind,
            })
            .collect();
        assert_eq!(kinds, vec!["Namespace", "Service", "Deployment"]);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let cluster = InMemoryCluster::new();
        let svc = resource("Service", "web");
        cluster
            .inject(svc.id.clone(), Fault::RejectApply { remaining: Some(2) })
            .await;

        let desired = ManifestSet::new(vec![svc.clone()]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(result.success());
        assert_eq!(result.results[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_tiers() {
        let cluster = InMemoryCluster::new();
        let svc = resource("Service", "web");
        cluster
            .inject(svc.id.clone(), Fault::RejectApply { remaining: None })
            .await;

        let desired = ManifestSet::new(vec![svc.clone(), resource("Deployment", "web")]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(!result.success());
        assert_eq!(result.skipped, 1);
        match result.failure {
            Some(ReconcileError::ApplyFailure { resource, attempts, .. }) => {
                assert_eq!(resource, "Service/default/web");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(cluster.apply_attempts(&svc.id).await, 3);
    }

    #[tokio::test]
    async fn test_readiness_timeout() {
        let cluster = InMemoryCluster::new();
        let deployment = Resource::from_manifest(
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}, "spec": {"replicas": 2}}),
            "default",
            "deployment.yaml",
        )
        .unwrap();
        cluster.inject(deployment.id.clone(), Fault::NeverReady).await;

        let desired = ManifestSet::new(vec![deployment]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(matches!(
            result.failure,
            Some(ReconcileError::ReadinessTimeout { ref detail, .. }) if detail == "0/2 replicas ready"
        ));
        assert_eq!(result.results[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_tier() {
        let cluster = InMemoryCluster::new();
        let desired = ManifestSet::new(vec![resource("Service", "web")]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(result.cancelled);
        assert!(matches!(result.failure, Some(ReconcileError::Cancelled { completed_tiers: 0 })));
        assert!(cluster.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_with_mock_cluster() {
        let mut cluster = MockClusterApi::new();
        let mut calls = 0;
        cluster.expect_apply().times(3).returning(move |resource: &Resource| {
            calls += 1;
            if calls < 3 {
                Err(ClusterError::network("connection reset").into())
            } else {
                Ok(LiveObject {
                    id: resource.id.clone(),
                    content: resource.content.clone(),
                })
            }
        });
        cluster.expect_get().returning(|id: &ResourceId| {
            Ok(Some(LiveObject {
                id: id.clone(),
                content: json!({}),
            }))
        });

        let desired = ManifestSet::new(vec![resource("ConfigMap", "cfg")]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&ManifestSet::empty(), &desired))
            .await;

        assert!(result.success());
        assert_eq!(result.results[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_delete().times(1).returning(|id: &ResourceId| {
            Err(ClusterError::NotFound {
                resource: id.to_string(),
            }
            .into())
        });
        cluster.expect_get().returning(|_: &ResourceId| Ok(None));

        let previous = ManifestSet::new(vec![resource("ConfigMap", "cfg")]).unwrap();
        let settings = settings();
        let cancel = CancelToken::new();
        let result = PlanExecutor::new(&cluster, &settings, &cancel)
            .execute(&plan(&previous, &ManifestSet::empty()))
            .await;

        assert!(result.success());
        assert_eq!(result.successful, 1);
    }
}
