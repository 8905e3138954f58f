pub mod config;
pub mod error;
pub mod globs;
pub mod tracing_init;

/// Crate version string, as reported by `GET /version` and `GetEnvMsg`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::SafeDisplay;
