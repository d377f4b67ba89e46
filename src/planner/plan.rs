//! Deployment plan types and construction.
//!
//! A plan is computed fresh for every apply attempt and never persisted.
//! Creates and updates run first in ascending weight order; deletes run
//! afterwards in descending weight order so dependents disappear before the
//! things they depend on.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::render::{ManifestSet, Resource, ResourceId};
use crate::state::ReleaseKey;

use super::diff::{DiffResult, DiffType};

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Release the plan targets.
    pub release: ReleaseKey,
    /// Deployed revision the plan was computed against.
    pub base_revision: Option<u32>,
    /// Planned actions in execution order (no-ops included for reporting).
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource identity.
    pub id: ResourceId,
    /// Ordering weight.
    pub weight: i32,
    /// Desired resource (creates, updates and no-ops).
    #[serde(skip)]
    pub resource: Option<Resource>,
    /// Reason for this action.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a resource.
    Create,
    /// Update an existing resource.
    Update,
    /// Delete a resource.
    Delete,
    /// No operation (for tracking).
    Noop,
}

/// Execution phase of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Creates and updates.
    Apply,
    /// Deletes.
    Delete,
}

/// A group of same-phase, same-weight actions that may run concurrently.
#[derive(Debug, Clone)]
pub struct Tier {
    /// Phase of every action in the tier.
    pub phase: Phase,
    /// Shared weight.
    pub weight: i32,
    /// Actions in the tier.
    pub actions: Vec<PlannedAction>,
}

impl DeploymentPlan {
    /// Creates a plan from a diff result.
    ///
    /// `desired` must be the manifest set the diff was computed towards; it
    /// supplies the content for creates and updates.
    #[must_use]
    pub fn from_diff(
        diff: &DiffResult,
        desired: &ManifestSet,
        release: &ReleaseKey,
        base_revision: Option<u32>,
    ) -> Self {
        let mut applies = Vec::new();
        let mut deletes = Vec::new();

        for resource_diff in &diff.diffs {
            let (action_type, reason) = match resource_diff.diff_type {
                DiffType::Create => (ActionType::Create, String::from("Resource added to manifest set")),
                DiffType::Update => (
                    ActionType::Update,
                    if resource_diff.details.is_empty() {
                        String::from("Content changed")
                    } else {
                        format!("{} field(s) changed", resource_diff.details.len())
                    },
                ),
                DiffType::Delete => (ActionType::Delete, String::from("Resource removed from manifest set")),
                DiffType::NoChange => (ActionType::Noop, String::from("Unchanged")),
            };

            let action = PlannedAction {
                action_type,
                id: resource_diff.id.clone(),
                weight: resource_diff.weight,
                resource: desired.get(&resource_diff.id).cloned(),
                reason,
            };

            if action_type == ActionType::Delete {
                deletes.push(action);
            } else {
                applies.push(action);
            }
        }

        applies.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.id.cmp(&b.id)));
        deletes.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.id.cmp(&b.id)));
        applies.extend(deletes);

        Self {
            created_at: Utc::now(),
            release: release.clone(),
            base_revision,
            actions: applies,
        }
    }

    /// Turns every no-op into an update.
    ///
    /// Used when the last attempt failed part-way and live content can no
    /// longer be trusted to match the recorded manifests.
    pub fn reapply_unchanged(&mut self) {
        for action in &mut self.actions {
            if action.action_type == ActionType::Noop {
                action.action_type = ActionType::Update;
                action.reason = String::from("Re-applied after failed attempt");
            }
        }
    }

    /// Groups executable actions into tiers, in execution order.
    ///
    /// No-ops are not executed and therefore never appear in a tier.
    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = Vec::new();

        for action in self.actions.iter().filter(|a| a.action_type != ActionType::Noop) {
            let phase = action.phase();
            match tiers.last_mut() {
                Some(tier) if tier.phase == phase && tier.weight == action.weight => {
                    tier.actions.push(action.clone());
                }
                _ => tiers.push(Tier {
                    phase,
                    weight: action.weight,
                    actions: vec![action.clone()],
                }),
            }
        }

        tiers
    }

    /// Returns true if the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(|a| a.action_type == ActionType::Noop)
    }

    /// Returns the number of actions, no-ops included.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a given type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ActionType::Delete)
    }

    /// Returns the number of no-op actions.
    #[must_use]
    pub fn noop_count(&self) -> usize {
        self.count(ActionType::Noop)
    }
}

impl PlannedAction {
    /// Execution phase of this action.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self.action_type {
            ActionType::Delete => Phase::Delete,
            ActionType::Create | ActionType::Update | ActionType::Noop => Phase::Apply,
        }
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.id),
            ActionType::Update => format!("Update {}", self.id),
            ActionType::Delete => format!("Delete {}", self.id),
            ActionType::Noop => format!("No change for {}", self.id),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan for {} ({} actions):", self.release, self.action_count())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}
