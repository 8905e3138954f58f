//! gRPC service wiring (§4.C5), grounded on
//! `cloud-component-service/src/grpcapi/mod.rs::start_grpc_server`: a
//! health service plus one `add_service` per RPC surface, all served
//! concurrently off a single listener. `tonic-reflection` is not wired up
//! here since the generated stubs don't export a file descriptor set
//! (see `DESIGN.md`).

mod admin;
mod convert;
mod server;

pub use admin::AdminService;
pub use server::ServerService;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use qjazz_api_grpc::rpc::qgis_admin_server::QgisAdminServer;
use qjazz_api_grpc::rpc::qgis_server_server::QgisServerServer;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;
use tracing::info;

use crate::pool::SupervisorPool;

fn to_status(err: anyhow::Error) -> tonic::Status {
    tonic::Status::internal(err.to_string())
}

pub async fn start_grpc_server(addr: SocketAddr, pool: Arc<SupervisorPool>) -> Result<()> {
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<QgisServerServer<ServerService>>()
        .await;
    health_reporter
        .set_serving::<QgisAdminServer<AdminService>>()
        .await;

    let server_service = ServerService::new(Arc::clone(&pool)).into_server();
    let admin_service = AdminService::new(pool, health_reporter).into_server();

    info!(%addr, "gRPC server listening");
    Server::builder()
        .add_service(health_service)
        .add_service(
            server_service
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .add_service(
            admin_service
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .serve(addr)
        .await?;
    Ok(())
}
