// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halyard
//!
//! A declarative release manager for Kubernetes-style clusters.
//!
//! ## Overview
//!
//! Halyard renders a templated bundle with layered values into a concrete
//! manifest set, computes the difference against the last deployed revision,
//! and reconciles the cluster towards it:
//!
//! - Install, upgrade and uninstall releases
//! - Record every attempt as an immutable, numbered revision
//! - Roll back to any previously deployed revision
//! - Roll back automatically when an upgrade fails
//!
//! ## Architecture
//!
//! Every mutation goes through the same pipeline:
//!
//! 1. **Render**: bundle + values -> manifest set ([`render`])
//! 2. **Diff & plan**: previous set vs. desired set -> ordered tiers ([`planner`])
//! 3. **Reconcile**: execute tiers against the cluster and wait for readiness ([`reconciler`])
//! 4. **Record**: append a revision to the release store ([`state`])
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`render`]: Bundles, values and template rendering
//! - [`state`]: Release store backends (local, memory)
//! - [`cluster`]: Cluster API trait, in-memory and HTTP implementations
//! - [`planner`]: Diff computation and plan execution
//! - [`reconciler`]: Install, upgrade and uninstall pipeline
//! - [`rollback`]: Rollback controller
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # halyard.yaml
//! namespace: apps
//!
//! state:
//!   backend: local
//!   history_max: 10
//!
//! cluster:
//!   backend: kubernetes
//!   server: https://k8s.example.com:6443
//!
//! reconcile:
//!   max_attempts: 3
//!   readiness_timeout_secs: 120
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod render;
pub mod rollback;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cluster::{ClusterApi, InMemoryCluster, KubeClient, Readiness};
pub use config::{ConfigParser, ConfigValidator, HalyardConfig};
pub use error::{HalyardError, Result};
pub use planner::{CancelToken, DeploymentPlan, DiffEngine, PlanExecutor};
pub use reconciler::{PlanPreview, Reconciler, ReleaseOutcome, ReleaseReport, ReleaseRequest};
pub use render::{Bundle, ManifestSet, Renderer, Resource, ResourceId, Values, ValuesSource};
pub use rollback::RollbackController;
pub use state::{
    InMemoryReleaseStore, LocalReleaseStore, ReleaseKey, ReleaseRecord, ReleaseStatus, ReleaseStore,
    Revision,
};
