pub mod config;
pub mod error;
pub mod eviction;
pub mod handler;
pub mod handlers;
pub mod manager;
pub mod model;
pub mod routes;

pub use config::ProjectsConfig;
pub use error::CacheError;
pub use handler::{ProjectLoader, ProtocolHandler};
pub use manager::{CacheEntry, CacheEntryRef, CacheManager, CheckoutSubject, DebugMetadata};
pub use model::{CheckoutStatus, ProjectMetadata, ResourceUri};
pub use routes::{Route, SearchPaths};
