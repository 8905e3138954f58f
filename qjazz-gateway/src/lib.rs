pub mod admin;
pub mod channel;
pub mod config;
pub mod pool;
pub mod router;

pub use admin::AdminApi;
pub use channel::Channel;
pub use config::GatewayConfig;
pub use pool::Pool;
pub use router::Router;
