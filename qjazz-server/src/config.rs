//! gRPC server configuration (§6 `CONF_SERVER`), grounded on
//! `cloud-servers-oss/src/config.rs::CloudServiceConfig` (port/pool shape)
//! and `qjazz_rpc`'s worker launch contract (`RENDEZ_VOUS`,
//! `QGIS_PROJECT_FILE`, `CONF_WORKER` environment variables passed to each
//! spawned child).

use std::collections::HashMap;

use qjazz_common::config::TracingConfig;
use serde::{Deserialize, Serialize};

fn default_listen_address() -> String {
    "127.0.0.1:23456".to_string()
}

fn default_pool_size() -> usize {
    2
}

fn default_start_timeout_secs() -> u64 {
    20
}

fn default_cancel_drain_timeout_secs() -> u64 {
    5
}

fn default_quit_grace_secs() -> u64 {
    10
}

fn default_terminate_timeout_secs() -> u64 {
    10
}

/// How to launch each worker child (§4.C4 "spawns the child"). Mirrors the
/// environment contract of §6: `RENDEZ_VOUS` and `QGIS_PROJECT_FILE` are set
/// by the supervisor itself and must not be listed in `env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Default project loaded at worker startup (`QGIS_PROJECT_FILE`).
    pub project_file: Option<String>,
    /// Path to the worker's own config file, exported as `CONF_WORKER`.
    pub config_file: Option<String>,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_cancel_drain_timeout_secs")]
    pub cancel_drain_timeout_secs: u64,
    #[serde(default = "default_quit_grace_secs")]
    pub quit_grace_secs: u64,
    #[serde(default = "default_terminate_timeout_secs")]
    pub terminate_timeout_secs: u64,
}

impl Default for WorkerProcessConfig {
    fn default() -> Self {
        Self {
            command: "qjazz-worker".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            project_file: None,
            config_file: None,
            start_timeout_secs: default_start_timeout_secs(),
            cancel_drain_timeout_secs: default_cancel_drain_timeout_secs(),
            quit_grace_secs: default_quit_grace_secs(),
            terminate_timeout_secs: default_terminate_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Number of worker supervisors (`N` in §4.C5, concurrency = N).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    pub worker: WorkerProcessConfig,
    pub tracing: TracingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            pool_size: default_pool_size(),
            worker: WorkerProcessConfig::default(),
            tracing: TracingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_spawn_two_workers_on_the_documented_command() {
        let config = ServerConfig::default();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.worker.command, "qjazz-worker");
        assert_eq!(config.worker.start_timeout_secs, 20);
    }
}
