//! HTTP gateway entry point (§4.C6/C7/C8): loads `GatewayConfig`, builds the
//! backend channel pool, and serves the public router and the admin API on
//! their own listeners until the process is asked to stop.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use poem::listener::TcpListener;
use poem::Server;
use qjazz_common::config::ConfigLoader;
use qjazz_common::tracing_init::init_tracing_with_default_env_filter;
use qjazz_gateway::admin;
use qjazz_gateway::config::GatewayConfig;
use qjazz_gateway::router;
use qjazz_gateway::{AdminApi, Pool, Router};
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader: ConfigLoader<GatewayConfig> = ConfigLoader::new("/etc/qjazz/gateway.toml");
    let path = env::var("CONF_GATEWAY").ok().map(PathBuf::from);
    let Some(config) = loader.load_or_dump_config(path.as_deref()) else {
        return Ok(());
    };

    init_tracing_with_default_env_filter(&config.tracing);

    let pool = Pool::new(
        Duration::from_secs(config.grace_period_secs),
        Duration::from_secs(config.health_reconnect_backoff_secs),
    );
    pool.init_channels(config.backends.clone()).await?;

    let listen_address = config.listen_address.clone();
    let admin_listen_address = config.admin.listen_address.clone();
    let shared_config = Arc::new(RwLock::new(config));

    let router = Arc::new(Router::new(pool.clone(), shared_config.clone()));
    let serving_app = router::app(router);

    let admin_api = Arc::new(AdminApi::new(pool.clone(), shared_config.clone()));
    let admin_app = admin::app(admin_api);

    let serving_server = Server::new(TcpListener::bind(listen_address)).run(serving_app);
    let admin_server = Server::new(TcpListener::bind(admin_listen_address)).run(admin_app);

    tokio::select! {
        result = serving_server => result?,
        result = admin_server => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
}
