//! Cluster access module.
//!
//! This module provides the [`ClusterApi`] seam and its backends:
//! - A Kubernetes API server client using server-side apply
//! - An in-memory cluster for tests and local dry runs
//! - Readiness assessment of live objects

mod api;
mod http;
mod memory;
mod readiness;

pub use api::{ClusterApi, LiveObject};
#[cfg(test)]
pub use api::MockClusterApi;
pub use http::KubeClient;
pub use memory::{ClusterEvent, Fault, InMemoryCluster};
pub use readiness::Readiness;
