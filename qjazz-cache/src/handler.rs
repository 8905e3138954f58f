//! The protocol handler contract (§4.C1): resolves logical paths to backend
//! URIs, enumerates projects under a root, and (via a separate
//! [`ProjectLoader`]) delegates the actual load to the renderer.
//!
//! Handler metadata operations stay synchronous, matching the file-system
//! and renderer-native storage backends this is grounded on
//! (`py_qgis_cache/handlers/file.py`); loading is split into its own
//! generic trait because it is the one operation that crosses into the
//! renderer's opaque project-handle type `P`, which this crate never names.

use crate::config::ProjectsConfig;
use crate::error::CacheError;
use crate::model::{ProjectMetadata, ResourceUri};

/// Resolves and enumerates resources for one URL scheme (`file`, `postgres`,
/// or a custom storage handler). Object-safe: the registry in
/// [`crate::manager::CacheManager`] holds these behind `Arc<dyn ProtocolHandler>`.
pub trait ProtocolHandler: Send + Sync {
    fn scheme(&self) -> &str;

    /// Called once per configured search path at startup. Static roots must
    /// exist; dynamic (templated) roots are not checked (§4.C1).
    fn validate_root_url(&self, root: &ResourceUri, is_dynamic: bool) -> Result<(), CacheError>;

    /// Canonical form used as the cache key. Must be idempotent.
    fn resolve_uri(&self, url: &ResourceUri) -> String;

    /// The reverse of `resolve_uri`: the public handle a client would use,
    /// given the resolved URL, the matched search-path location and its
    /// root.
    fn public_path(&self, uri: &str, location: &str, root: &ResourceUri) -> String;

    /// Fails with [`CacheError::NotFound`] carrying the attempted URI when
    /// the resource is absent, which is how `checkout` falls back to a
    /// by-URI cache lookup on removal.
    fn project_metadata(&self, url: &ResourceUri) -> Result<ProjectMetadata, CacheError>;

    /// Finite, possibly empty; recursive for directory-like roots.
    fn list_projects(&self, root: &ResourceUri) -> Result<Vec<ProjectMetadata>, CacheError>;
}

/// Loads (and releases) the renderer-native project handle `P`. Kept
/// separate from [`ProtocolHandler`] because every handler delegates to the
/// same loader regardless of scheme (`file.py::project` calls the shared
/// `load_project_from_uri`), and because `P` is owned by the worker crate,
/// not this one.
pub trait ProjectLoader<P>: Send + Sync {
    fn load(&self, md: &ProjectMetadata, config: &ProjectsConfig) -> Result<P, CacheError>;

    /// Notifies the renderer to release any per-project state. Called on
    /// entry destruction (`CacheManager::clear`, eviction, explicit drop).
    fn release(&self, _project: &P) {}
}
