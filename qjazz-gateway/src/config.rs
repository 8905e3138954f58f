//! Gateway configuration (§6 `CONF_GATEWAY`), grounded on
//! `qjazz-server/src/config.rs`'s `ConfigLoader<T>` + `TracingConfig` shape.
//! A backend groups everything the router needs to reach one worker pool
//! behind one gRPC address: the route prefix it answers under, the headers
//! forwarded to it, its declared API endpoints and WFS safety limit.

use std::collections::HashMap;

use qjazz_common::config::TracingConfig;
use serde::{Deserialize, Serialize};

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_admin_listen_address() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_forward_headers() -> Vec<String> {
    vec!["x-qgis-*".to_string(), "x-lizmap-*".to_string()]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_enable_html_delegate() -> bool {
    true
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

/// One API endpoint a backend declares under `/_/{api_name}/...` (§4.C7
/// rule 4). `delegate_to` forwards the request under a rewritten root path;
/// `enable_html_delegate=false` makes `.html` paths on a delegated endpoint
/// respond 415 instead of being forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpointConfig {
    pub name: String,
    pub delegate_to: Option<String>,
    #[serde(default = "default_enable_html_delegate")]
    pub enable_html_delegate: bool,
}

impl Default for ApiEndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            delegate_to: None,
            enable_html_delegate: default_enable_html_delegate(),
        }
    }
}

/// One worker pool address and the route it answers under (§4.C6/C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `http(s)://host:port` of the `QgisServer`/`QgisAdmin` gRPC endpoint.
    pub address: String,
    /// Longest-prefix route this backend answers under.
    pub route_prefix: String,
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub api_endpoints: Vec<ApiEndpointConfig>,
    /// WFS GetFeature safety cap; `COUNT`/`MAXFEATURES` is clamped to this.
    pub getfeature_limit: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:23456".to_string(),
            route_prefix: String::new(),
            forward_headers: default_forward_headers(),
            timeout_secs: default_timeout_secs(),
            api_endpoints: Vec::new(),
            getfeature_limit: None,
        }
    }
}

/// `Access-Control-Allow-Origin` policy (§4.C7 CORS).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum CrossOrigin {
    All,
    SameOrigin,
    Url { value: String },
}

impl Default for CrossOrigin {
    fn default() -> Self {
        CrossOrigin::SameOrigin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub cross_origin: CrossOrigin,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            cross_origin: CrossOrigin::default(),
        }
    }
}

/// Admin HTTP listener (§4.C8): separate bind address, bearer-token auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen_address")]
    pub listen_address: String,
    /// Empty means the admin API is unauthenticated.
    pub bearer_tokens: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_address: default_admin_listen_address(),
            bearer_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub admin: AdminConfig,
    pub backends: HashMap<String, BackendConfig>,
    pub cors: CorsConfig,
    /// Seconds a channel with `in_use>0` is given to drain before a removal
    /// or reconfiguration forcibly closes it (§4.C6 `remove_backend`).
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_reconnect_backoff_secs")]
    pub health_reconnect_backoff_secs: u64,
    pub tracing: TracingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            admin: AdminConfig::default(),
            backends: HashMap::new(),
            cors: CorsConfig::default(),
            grace_period_secs: default_grace_period_secs(),
            health_reconnect_backoff_secs: default_reconnect_backoff_secs(),
            tracing: TracingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_backends_and_a_local_admin_listener() {
        let config = GatewayConfig::default();
        assert!(config.backends.is_empty());
        assert_eq!(config.admin.listen_address, "127.0.0.1:8081");
        assert_eq!(config.grace_period_secs, 10);
    }

    #[test]
    fn endpoint_defaults_allow_html_delegation() {
        let endpoint = ApiEndpointConfig {
            name: "wfs3".to_string(),
            ..Default::default()
        };
        assert!(endpoint.enable_html_delegate);
        assert!(endpoint.delegate_to.is_none());
    }
}
