//! Template rendering module.
//!
//! This module turns a bundle plus a values tree into a concrete, ordered
//! manifest set:
//! - Loading bundles from disk
//! - Merging values layers
//! - Expanding template placeholders
//! - Hashing rendered resources for change detection

mod bundle;
mod hash;
mod renderer;
mod resource;
mod template;
mod values;

pub use bundle::{Bundle, BundleMetadata, Template, BUNDLE_FILE, TEMPLATES_DIR, VALUES_FILE};
pub use hash::ContentHasher;
pub use renderer::Renderer;
pub use resource::{
    is_cluster_scoped, weight_for_kind, ManifestSet, Resource, ResourceId, DEFAULT_WEIGHT,
    WEIGHT_ANNOTATION, WORKLOAD_KINDS,
};
pub use template::{expand, ReleaseContext, TemplateContext};
pub use values::{parse_set_value, Values, ValuesSource};
