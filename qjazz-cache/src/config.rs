//! Checkout-engine configuration (§6), taken from `qjazz_cache/config.py`
//! and `qjazz_rpc/config.py::QgisConfig`. `max_projects` lives one level up
//! in the Python package split (`QgisConfig` vs `ProjectsConfig`); we fold
//! it into this crate's config since `CacheManager` needs it directly and
//! this crate doesn't otherwise depend on the worker's config type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub trust_layer_metadata: bool,
    pub disable_getprint: bool,
    #[serde(default = "default_true")]
    pub force_readonly_layers: bool,
    pub ignore_bad_layers: bool,
    pub disable_advertised_urls: bool,
    /// `location -> root url string`, built into a [`crate::routes::SearchPaths`]
    /// at startup.
    pub search_paths: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub allow_direct_path_resolution: bool,
    /// Maximum number of resident projects before eviction is attempted
    /// (`QgisConfig.max_projects`).
    #[serde(default = "default_max_projects")]
    pub max_projects: usize,
    #[serde(default = "default_true")]
    pub load_project_on_request: bool,
    #[serde(default = "default_true")]
    pub reload_outdated_project_on_request: bool,
}

fn default_max_projects() -> usize {
    50
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            trust_layer_metadata: false,
            disable_getprint: false,
            force_readonly_layers: true,
            ignore_bad_layers: false,
            disable_advertised_urls: false,
            search_paths: HashMap::new(),
            allow_direct_path_resolution: true,
            max_projects: default_max_projects(),
            load_project_on_request: true,
            reload_outdated_project_on_request: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ProjectsConfig::default();
        assert!(config.allow_direct_path_resolution);
        assert_eq!(config.max_projects, 50);
        assert!(config.force_readonly_layers);
    }
}
