//! Per-worker cache manager (§4.C2): the checkout state machine, capacity
//! enforcement and eviction, grounded on
//! `qjazz_cache/cachemanager.py::CacheManager`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ProjectsConfig;
use crate::error::{self, CacheError};
use crate::eviction::evict_by_popularity;
use crate::handler::{ProjectLoader, ProtocolHandler};
use crate::model::{CheckoutStatus, ProjectMetadata, ResourceUri};
use crate::routes::{Route, SearchPaths};

/// Best-effort load statistics (§3), kept monotonic across reloads the way
/// `_new_cache_entry` does: a reload's memory delta never reports lower
/// than a previous load's, since the heuristic is noisy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMetadata {
    pub load_memory_bytes: Option<i64>,
    pub load_time_ms: u64,
}

/// A resident project: the renderer-native handle `P`, loaded once and
/// owned exclusively by this cache.
#[derive(Debug)]
pub struct CacheEntry<P> {
    pub md: ProjectMetadata,
    pub project: Arc<P>,
    pub timestamp: f64,
    pub debug_meta: DebugMetadata,
    pub last_hit: f64,
    pub hits: u64,
    pub pinned: bool,
}

impl<P> CacheEntry<P> {
    /// Records a cache hit (`hit_me`).
    pub fn hit_me(&mut self) {
        self.hits += 1;
        self.last_hit = now_secs();
    }

    /// Marks an entry immune to eviction — set only for projects explicitly
    /// loaded via the admin/pull path (§4.C2 "Pinning").
    pub fn pin(&mut self) {
        self.pinned = true;
    }
}

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct CacheManager<P> {
    config: ProjectsConfig,
    search_paths: SearchPaths,
    handlers: HashMap<String, Arc<dyn ProtocolHandler>>,
    loader: Arc<dyn ProjectLoader<P>>,
    cache: HashMap<String, CacheEntry<P>>,
    /// Holds the most recently removed entry so `update(.., REMOVED)` can
    /// return a reference to it after it's taken out of `cache`.
    removed_scratch: Option<CacheEntry<P>>,
}

impl<P> CacheManager<P> {
    pub fn new(
        config: ProjectsConfig,
        routes: Vec<Route>,
        loader: Arc<dyn ProjectLoader<P>>,
    ) -> Self {
        Self {
            config,
            search_paths: SearchPaths::new(routes),
            handlers: HashMap::new(),
            loader,
            cache: HashMap::new(),
            removed_scratch: None,
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.insert(handler.scheme().to_string(), handler);
    }

    /// Validates every configured route's root url against its handler
    /// (`initialize_handlers`). Called once at startup.
    pub fn validate_routes(&self) -> Result<(), CacheError> {
        for route in self.search_paths.routes() {
            let handler = self.handler_for(&route.root().scheme)?;
            handler.validate_root_url(route.root(), route.is_dynamic())?;
        }
        Ok(())
    }

    pub fn conf(&self) -> &ProjectsConfig {
        &self.config
    }

    pub fn handler_for(&self, scheme: &str) -> Result<&Arc<dyn ProtocolHandler>, CacheError> {
        self.handlers
            .get(scheme)
            .ok_or_else(|| CacheError::InvalidArgument(format!("no protocol handler for scheme '{scheme}'")))
    }

    /// Resolves a logical path to a URL by applying search paths in order,
    /// falling back to direct interpretation when allowed (§4.C2).
    pub fn resolve_path(&self, path: &str, allow_direct: bool) -> Result<ResourceUri, CacheError> {
        if let Some(url) = self.search_paths.resolve(path) {
            return Ok(url);
        }
        if allow_direct || self.config.allow_direct_path_resolution {
            Ok(ResourceUri::parse(path))
        } else {
            Err(error::resource_not_allowed(path))
        }
    }

    pub fn locations(&self, location: Option<&str>) -> Vec<(String, ResourceUri)> {
        self.search_paths.locations(location)
    }

    /// Pure query, no mutation: resolves the current status of `url`
    /// against the cache (§4.C2 `checkout`).
    pub fn checkout(
        &self,
        url: &ResourceUri,
    ) -> Result<(Option<CheckoutSubject>, CheckoutStatus), CacheError> {
        let handler = self.handler_for(&url.scheme)?;
        match handler.project_metadata(url) {
            Ok(md) => {
                if let Some(entry) = self.cache.get(&md.uri) {
                    if md.last_modified > entry.md.last_modified {
                        Ok((Some(CheckoutSubject::Uri(md.uri.clone())), CheckoutStatus::NeedUpdate))
                    } else {
                        Ok((Some(CheckoutSubject::Uri(md.uri.clone())), CheckoutStatus::Unchanged))
                    }
                } else {
                    Ok((Some(CheckoutSubject::Metadata(md)), CheckoutStatus::New))
                }
            }
            Err(CacheError::NotFound(attempted_uri)) => {
                if self.cache.contains_key(&attempted_uri) {
                    Ok((Some(CheckoutSubject::Uri(attempted_uri)), CheckoutStatus::Removed))
                } else {
                    Ok((None, CheckoutStatus::NotFound))
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Re-checks an existing entry against storage (`checkout_entry`), used
    /// by `update_cache`.
    fn checkout_entry(&self, uri: &str) -> Result<CheckoutStatus, CacheError> {
        let entry = self
            .cache
            .get(uri)
            .ok_or_else(|| CacheError::Internal(format!("no cache entry for '{uri}'")))?;
        let handler = self.handler_for(&entry.md.scheme)?;
        let url = ResourceUri::parse(&entry.md.uri);
        match handler.project_metadata(&url) {
            Ok(md) => {
                if md.last_modified > entry.md.last_modified {
                    Ok(CheckoutStatus::NeedUpdate)
                } else {
                    Ok(CheckoutStatus::Unchanged)
                }
            }
            Err(CacheError::NotFound(_)) => Ok(CheckoutStatus::Removed),
            Err(other) => Err(other),
        }
    }

    /// Mutates the cache according to `status` (§4.C2 `update`). `pull`
    /// additionally pins the resulting entry, matching
    /// `_op_cache.py::checkout_project`'s explicit-load branch.
    pub fn update(
        &mut self,
        md: ProjectMetadata,
        status: CheckoutStatus,
        pull: bool,
    ) -> Result<(CacheEntryRef<'_, P>, CheckoutStatus), CacheError> {
        match status {
            CheckoutStatus::New => {
                self.ensure_capacity()?;
                let entry = self.load_entry(md.clone(), pull)?;
                self.cache.insert(md.uri.clone(), entry);
                Ok((CacheEntryRef(self.cache.get(&md.uri).unwrap()), CheckoutStatus::New))
            }
            CheckoutStatus::NeedUpdate => {
                self.cache.remove(&md.uri);
                let entry = self.load_entry(md.clone(), pull)?;
                self.cache.insert(md.uri.clone(), entry);
                Ok((
                    CacheEntryRef(self.cache.get(&md.uri).unwrap()),
                    CheckoutStatus::Updated,
                ))
            }
            CheckoutStatus::Unchanged | CheckoutStatus::Updated => {
                let entry = self
                    .cache
                    .get(&md.uri)
                    .ok_or_else(|| CacheError::Internal(format!("missing entry for '{}'", md.uri)))?;
                Ok((CacheEntryRef(entry), status))
            }
            CheckoutStatus::Removed => {
                let entry = self
                    .cache
                    .remove(&md.uri)
                    .ok_or_else(|| CacheError::Internal(format!("missing entry for '{}'", md.uri)))?;
                self.loader.release(&entry.project);
                // Stashed so the caller can still inspect the removed entry
                // without us returning a reference into freed map storage.
                self.removed_scratch = Some(entry);
                Ok((
                    CacheEntryRef(self.removed_scratch.as_ref().unwrap()),
                    CheckoutStatus::Removed,
                ))
            }
            CheckoutStatus::NotFound => Err(CacheError::InvalidArgument(
                "update() must not be called with NOTFOUND".to_string(),
            )),
        }
    }

    fn ensure_capacity(&mut self) -> Result<(), CacheError> {
        if self.cache.len() < self.config.max_projects {
            return Ok(());
        }
        if evict_by_popularity(self).is_none() {
            return Err(error::capacity_exhausted());
        }
        Ok(())
    }

    fn load_entry(&self, md: ProjectMetadata, pinned: bool) -> Result<CacheEntry<P>, CacheError> {
        let start = std::time::Instant::now();
        let project = self.loader.load(&md, &self.config)?;
        Ok(CacheEntry {
            md,
            project: Arc::new(project),
            timestamp: now_secs(),
            debug_meta: DebugMetadata {
                load_memory_bytes: None,
                load_time_ms: start.elapsed().as_millis() as u64,
            },
            last_hit: 0.0,
            hits: 0,
            pinned,
        })
    }

    /// Refreshes every entry against storage, applying `NEEDUPDATE` or
    /// `REMOVED` as appropriate (`update_cache`).
    pub fn update_cache(&mut self) -> Result<Vec<(String, CheckoutStatus)>, CacheError> {
        let uris: Vec<String> = self.cache.keys().cloned().collect();
        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            let status = self.checkout_entry(&uri)?;
            match status {
                CheckoutStatus::NeedUpdate => {
                    let md = self.cache.get(&uri).unwrap().md.clone();
                    let (_, applied) = self.update(md, CheckoutStatus::NeedUpdate, false)?;
                    results.push((uri, applied));
                }
                CheckoutStatus::Removed => {
                    let md = self.cache.get(&uri).unwrap().md.clone();
                    self.update(md, CheckoutStatus::Removed, false)?;
                    results.push((uri, CheckoutStatus::Removed));
                }
                other => results.push((uri, other)),
            }
        }
        Ok(results)
    }

    /// Removes all entries, notifying the loader to release per-project
    /// state for each.
    pub fn clear(&mut self) {
        for entry in self.cache.values() {
            self.loader.release(&entry.project);
        }
        self.cache.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<P>> {
        self.cache.values()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<&CacheEntry<P>> {
        self.cache.get(uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut CacheEntry<P>> {
        self.cache.get_mut(uri)
    }

    pub(crate) fn raw_entries(&self) -> &HashMap<String, CacheEntry<P>> {
        &self.cache
    }

    pub(crate) fn remove_entry(&mut self, uri: &str) -> Option<CacheEntry<P>> {
        let entry = self.cache.remove(uri)?;
        self.loader.release(&entry.project);
        Some(entry)
    }

    /// Drops a single entry by uri regardless of checkout status, notifying
    /// the loader (`DropProjectMsg`, §4.C3).
    pub fn remove(&mut self, uri: &str) -> Option<CacheEntry<P>> {
        self.remove_entry(uri)
    }
}

/// The subject returned by `checkout` before a decision to update has been
/// made: either a brand-new metadata record (`NEW`) or a reference (by uri)
/// to an existing entry.
#[derive(Debug, Clone)]
pub enum CheckoutSubject {
    Metadata(ProjectMetadata),
    Uri(String),
}

/// A borrowed view of a cache entry returned from `update`, avoiding an
/// extra clone of `P`.
pub struct CacheEntryRef<'a, P>(pub &'a CacheEntry<P>);

impl<'a, P> std::ops::Deref for CacheEntryRef<'a, P> {
    type Target = CacheEntry<P>;
    fn deref(&self) -> &CacheEntry<P> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FileProtocolHandler;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ProjectLoader<String> for CountingLoader {
        fn load(&self, md: &ProjectMetadata, _config: &ProjectsConfig) -> Result<String, CacheError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(md.uri.clone())
        }
    }

    fn manager_with_capacity(max_projects: usize) -> (tempfile::TempDir, CacheManager<String>) {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectsConfig {
            max_projects,
            ..ProjectsConfig::default()
        };
        let mut cm = CacheManager::new(
            config,
            Vec::new(),
            Arc::new(CountingLoader {
                loads: AtomicUsize::new(0),
            }),
        );
        cm.register_handler(Arc::new(FileProtocolHandler::new()));
        (dir, cm)
    }

    #[test]
    fn checkout_reports_new_for_unseen_project() {
        let (dir, cm) = manager_with_capacity(10);
        fs::write(dir.path().join("a.qgs"), b"").unwrap();
        let url = ResourceUri::new("file", dir.path().join("a.qgs").to_string_lossy().to_string());
        let (subject, status) = cm.checkout(&url).unwrap();
        assert_eq!(status, CheckoutStatus::New);
        assert!(matches!(subject, Some(CheckoutSubject::Metadata(_))));
    }

    #[test]
    fn checkout_reports_not_found_for_missing_project() {
        let (dir, cm) = manager_with_capacity(10);
        let url = ResourceUri::new("file", dir.path().join("missing.qgs").to_string_lossy().to_string());
        let (subject, status) = cm.checkout(&url).unwrap();
        assert_eq!(status, CheckoutStatus::NotFound);
        assert!(subject.is_none());
    }

    #[test]
    fn update_on_new_inserts_and_then_reports_unchanged() {
        let (dir, mut cm) = manager_with_capacity(10);
        fs::write(dir.path().join("a.qgs"), b"").unwrap();
        let url = ResourceUri::new("file", dir.path().join("a.qgs").to_string_lossy().to_string());

        let (subject, status) = cm.checkout(&url).unwrap();
        let md = match subject.unwrap() {
            CheckoutSubject::Metadata(md) => md,
            _ => panic!("expected NEW metadata"),
        };
        let (_, applied) = cm.update(md.clone(), status, false).unwrap();
        assert_eq!(applied, CheckoutStatus::New);
        assert_eq!(cm.len(), 1);

        let (_, status2) = cm.checkout(&url).unwrap();
        assert_eq!(status2, CheckoutStatus::Unchanged);
    }

    #[test]
    fn update_refuses_not_found() {
        let (_dir, mut cm) = manager_with_capacity(10);
        let md = ProjectMetadata {
            uri: "file:///nope".to_string(),
            name: "nope".to_string(),
            scheme: "file".to_string(),
            storage: None,
            last_modified: 0,
            saved_version: None,
        };
        let err = cm.update(md, CheckoutStatus::NotFound, false).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[test]
    fn capacity_exhausted_when_all_entries_pinned() {
        let (dir, mut cm) = manager_with_capacity(1);
        fs::write(dir.path().join("a.qgs"), b"").unwrap();
        fs::write(dir.path().join("b.qgs"), b"").unwrap();

        let url_a = ResourceUri::new("file", dir.path().join("a.qgs").to_string_lossy().to_string());
        let (subject, status) = cm.checkout(&url_a).unwrap();
        let md_a = match subject.unwrap() {
            CheckoutSubject::Metadata(md) => md,
            _ => unreachable!(),
        };
        cm.update(md_a, status, true).unwrap();
        cm.get_mut(&dir.path().join("a.qgs").to_string_lossy().to_string())
            .unwrap()
            .pin();

        let url_b = ResourceUri::new("file", dir.path().join("b.qgs").to_string_lossy().to_string());
        let (subject, status) = cm.checkout(&url_b).unwrap();
        let md_b = match subject.unwrap() {
            CheckoutSubject::Metadata(md) => md,
            _ => unreachable!(),
        };
        let err = cm.update(md_b, status, false).unwrap_err();
        assert!(matches!(err, CacheError::CapacityExhausted));
    }
}
