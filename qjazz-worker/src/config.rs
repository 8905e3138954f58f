//! Worker process configuration (§6 `CONF_WORKER`), grounded on
//! `qjazz_rpc/config.py::QgisConfig`. `max_projects` and the on-request
//! load/reload flags live on [`qjazz_cache::ProjectsConfig`] in this crate
//! split (see that module's doc comment).

use qjazz_cache::ProjectsConfig;
use qjazz_common::config::TracingConfig;
use serde::{Deserialize, Serialize};

fn default_max_chunk_size() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub projects: ProjectsConfig,
    /// Allow embedded macros in loaded projects. Disabled by default since
    /// macros run arbitrary code in the renderer process.
    pub enable_python_embedded: bool,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    pub tracing: TracingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            projects: ProjectsConfig::default(),
            enable_python_embedded: false,
            max_chunk_size: default_max_chunk_size(),
            tracing: TracingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_python_embedded() {
        let config = WorkerConfig::default();
        assert!(!config.enable_python_embedded);
        assert_eq!(config.max_chunk_size, 1024 * 1024);
    }
}
