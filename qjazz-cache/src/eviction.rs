//! Eviction strategy (§4.C2), grounded on
//! `qjazz_cache/extras.py::evict_by_popularity`.

use crate::manager::CacheManager;
use crate::model::CheckoutStatus;

/// Removes the non-pinned entry minimizing `hits / (now - timestamp)` — a
/// hyperbolic-cache popularity score (see the `extras.py` reference to the
/// USENIX ATC'17 hyperbolic caching paper). Returns the evicted entry's uri,
/// or `None` if every entry is pinned.
///
/// Ties break on iteration order (first minimal entry found), since we
/// don't need a stable secondary key for this heuristic.
pub fn evict_by_popularity<P>(cm: &mut CacheManager<P>) -> Option<String> {
    let now = crate::manager::now_secs();

    let candidate = cm
        .raw_entries()
        .iter()
        .filter(|(_, e)| !e.pinned)
        .min_by(|(_, a), (_, b)| {
            let score_a = a.hits as f64 / (now - a.timestamp).max(f64::EPSILON);
            let score_b = b.hits as f64 / (now - b.timestamp).max(f64::EPSILON);
            score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(uri, e)| (uri.clone(), e.md.clone()));

    let (uri, md) = candidate?;
    cm.update(md, CheckoutStatus::Removed, false).ok()?;
    Some(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectsConfig;
    use crate::error::CacheError;
    use crate::handler::ProjectLoader;
    use crate::model::ProjectMetadata;
    use std::sync::Arc;

    struct NullLoader;
    impl ProjectLoader<()> for NullLoader {
        fn load(&self, _md: &ProjectMetadata, _config: &ProjectsConfig) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn md(uri: &str) -> ProjectMetadata {
        ProjectMetadata {
            uri: uri.to_string(),
            name: uri.to_string(),
            scheme: "file".to_string(),
            storage: None,
            last_modified: 0,
            saved_version: None,
        }
    }

    #[test]
    fn evicts_least_popular_non_pinned_entry() {
        let mut cm: CacheManager<()> =
            CacheManager::new(ProjectsConfig::default(), Vec::new(), Arc::new(NullLoader));

        cm.update(md("popular"), CheckoutStatus::New, false).unwrap();
        cm.update(md("unpopular"), CheckoutStatus::New, false).unwrap();

        // Make "popular" score higher: many hits, "unpopular" stays at 0 hits.
        for _ in 0..100 {
            cm.get_mut("popular").unwrap().hit_me();
        }

        let evicted = evict_by_popularity(&mut cm).unwrap();
        assert_eq!(evicted, "unpopular");
        assert!(cm.get("unpopular").is_none());
        assert!(cm.get("popular").is_some());
    }

    #[test]
    fn returns_none_when_all_entries_pinned() {
        let mut cm: CacheManager<()> =
            CacheManager::new(ProjectsConfig::default(), Vec::new(), Arc::new(NullLoader));
        cm.update(md("only"), CheckoutStatus::New, true).unwrap();
        cm.get_mut("only").unwrap().pin();

        assert!(evict_by_popularity(&mut cm).is_none());
    }
}
