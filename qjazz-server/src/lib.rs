pub mod config;
pub mod grpcapi;
pub mod pool;
pub mod supervisor;

pub use config::ServerConfig;
pub use grpcapi::start_grpc_server;
pub use pool::{SupervisorHandle, SupervisorPool};
pub use supervisor::Supervisor;
