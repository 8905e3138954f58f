//! gRPC server entry point (§4.C5): loads `ServerConfig`, spawns the
//! worker pool, and serves `QgisServer`/`QgisAdmin` until the process is
//! asked to stop.

use std::env;
use std::path::PathBuf;

use qjazz_common::config::ConfigLoader;
use qjazz_common::tracing_init::init_tracing_with_default_env_filter;
use qjazz_server::config::ServerConfig;
use qjazz_server::{start_grpc_server, SupervisorPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader: ConfigLoader<ServerConfig> = ConfigLoader::new("/etc/qjazz/server.toml");
    let path = env::var("CONF_SERVER").ok().map(PathBuf::from);
    let Some(config) = loader.load_or_dump_config(path.as_deref()) else {
        return Ok(());
    };

    init_tracing_with_default_env_filter(&config.tracing);

    let rendezvous_dir = env::var("QJAZZ_RENDEZVOUS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("qjazz-server"));

    let pool = SupervisorPool::start(&config, rendezvous_dir).await?;
    let addr = config.listen_address.parse()?;

    let shutdown_pool = pool.clone();
    tokio::select! {
        result = start_grpc_server(addr, pool) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested, terminating worker pool");
            shutdown_pool.terminate_all().await;
        }
    }

    Ok(())
}
