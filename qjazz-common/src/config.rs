//! Configuration loading shared by every qjazz-serve binary.
//!
//! Mirrors the teacher's `ConfigLoader<T>` / `Figment` pairing: a TOML file
//! merged with environment overrides, with the `CONF_` prefix and `__` as the
//! nesting separator (matching `CONF_WORKER` / `CONF_LOGGING__LEVEL` from the
//! wire contract).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CONF_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("failed to serialize configuration: {0}")]
    Dump(#[from] serde_json::Error),
}

/// Loads a `T` from an optional TOML file plus `CONF_`-prefixed environment
/// variables, falling back to `T::default()` when nothing is supplied.
pub struct ConfigLoader<T> {
    default_path: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ConfigLoader<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: default_path.into(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Loads configuration from `path` (or the loader's default path if
    /// `path` is `None` and the default exists), merging `CONF_*` env vars on
    /// top. Missing files are not an error: the figment simply falls back to
    /// field defaults via `serde`.
    pub fn load_from(&self, path: Option<&Path>) -> Result<T, ConfigError> {
        let path = path.unwrap_or(&self.default_path);
        let figment = Figment::from(figment::providers::Serialized::defaults(
            serde_json::to_value(T::default())?,
        ))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(figment.extract()?)
    }

    pub fn load(&self) -> Result<T, ConfigError> {
        self.load_from(None)
    }

    /// Honors `--dump-config`: prints the effective configuration as TOML and
    /// returns `None` so the caller can exit without starting the server.
    /// Otherwise loads normally and returns `Some(config)`.
    pub fn load_or_dump_config(&self, path: Option<&Path>) -> Option<T> {
        let dump_requested = std::env::args().any(|a| a == "--dump-config");
        match self.load_from(path) {
            Ok(config) => {
                if dump_requested {
                    match toml::to_string_pretty(&config) {
                        Ok(s) => println!("{s}"),
                        Err(e) => eprintln!("failed to render configuration: {e}"),
                    }
                    None
                } else {
                    Some(config)
                }
            }
            Err(e) => {
                eprintln!("configuration error: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Ambient tracing configuration, read from the `[tracing]` section of every
/// binary's config and from `CONF_LOGGING__LEVEL` / `RUST_LOG`.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error`, or a full `tracing_subscriber`
    /// filter directive such as `qjazz_cache=debug,info`.
    pub level: String,
    /// Emit newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl TracingConfig {
    pub fn local_dev(service: &str) -> Self {
        Self {
            level: format!("{service}=debug,info"),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Example {
        port: u16,
        name: String,
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader: ConfigLoader<Example> = ConfigLoader::new("does/not/exist.toml");
        let config = loader.load().expect("defaults should load");
        assert_eq!(config, Example::default());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "port = 4242\nname = \"gateway\"\n").unwrap();

        let loader: ConfigLoader<Example> = ConfigLoader::new(&path);
        let config = loader.load_from(Some(&path)).unwrap();
        assert_eq!(config.port, 4242);
        assert_eq!(config.name, "gateway");
    }

    #[test]
    fn env_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "port = 4242\nname = \"gateway\"\n").unwrap();

        std::env::set_var("CONF_PORT", "9000");
        let loader: ConfigLoader<Example> = ConfigLoader::new(&path);
        let config = loader.load_from(Some(&path)).unwrap();
        std::env::remove_var("CONF_PORT");

        assert_eq!(config.port, 9000);
    }
}
