//! Planning module for release operations.
//!
//! This module compares the previously deployed manifest set with a newly
//! rendered one, turns the difference into an ordered plan, and executes
//! that plan against the cluster tier by tier.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionResult, CancelToken, ExecutionResult, ExecutorSettings, PlanExecutor};
pub use plan::{ActionType, DeploymentPlan, Phase, PlannedAction, Tier};
