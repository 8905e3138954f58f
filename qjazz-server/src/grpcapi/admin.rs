//! `QgisAdmin` RPC implementation (§4.C5 "Admin service"): each RPC maps
//! onto exactly one worker message, except `SetServerServingStatus`, which
//! only flips the health reporter and never reaches a worker (§4.C5 health
//! transitions).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::BoxStream;
use qjazz_ipc::messages::{
    CacheInfo, CatalogItem, CatalogMsg, CheckoutProjectMsg, ClearCacheMsg, DropProjectMsg, Envelope,
    GetConfigMsg, GetEnvMsg, GetProjectInfoMsg, ListCacheMsg, Message, PluginInfo, PluginsMsg,
    ProjectInfo, PutConfigMsg, SleepMsg, StatsMsg,
};
use qjazz_api_grpc::rpc;
use qjazz_api_grpc::rpc::qgis_admin_server::{QgisAdmin, QgisAdminServer};
use tonic::{Request, Response, Status};
use tonic_health::server::HealthReporter;

use super::convert::http_status_to_grpc_code;
use super::to_status;
use crate::pool::{SupervisorHandle, SupervisorPool};

pub struct AdminService {
    pool: Arc<SupervisorPool>,
    health: HealthReporter,
}

impl AdminService {
    pub fn new(pool: Arc<SupervisorPool>, health: HealthReporter) -> Self {
        Self { pool, health }
    }

    pub fn into_server(self) -> QgisAdminServer<Self> {
        QgisAdminServer::new(self)
    }

    async fn send_unary(&self, msg: Message) -> Result<Envelope, Status> {
        let handle = self.pool.acquire().await;
        handle.send_unary(msg).await.map_err(to_status)
    }

    fn stream_of<T, P>(&self, msg: Message) -> BoxStream<'static, Result<P, Status>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
        P: From<T> + Send + 'static,
    {
        let handle_fut = self.pool.clone();
        Box::pin(futures::stream::once(async move { handle_fut.acquire().await }).flat_map(
            move |handle: SupervisorHandle| {
                let rx = handle.execute(msg.clone());
                futures::stream::unfold((rx, Some(handle)), |(mut rx, guard)| async move {
                    loop {
                        match rx.recv().await {
                            Some(Ok(envelope)) if envelope.is_end_of_stream() => return None,
                            Some(Ok(envelope)) => match decode_chunk::<T>(&envelope) {
                                Ok(item) => return Some((Ok(P::from(item)), (rx, guard))),
                                Err(status) => return Some((Err(status), (rx, guard))),
                            },
                            Some(Err(e)) => return Some((Err(to_status(e)), (rx, guard))),
                            None => return None,
                        }
                    }
                })
            },
        ))
    }
}

fn decode_chunk<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, Status> {
    match &envelope.body {
        rmpv::Value::Binary(bytes) => {
            rmp_serde::from_slice(bytes).map_err(|e| Status::internal(format!("malformed stream chunk: {e}")))
        }
        _ => Err(Status::internal("malformed stream chunk")),
    }
}

/// Turns a single-frame worker reply into either `T` or the gRPC status
/// matching its HTTP-style error code (§7).
fn unary_reply<T: serde::de::DeserializeOwned>(envelope: Envelope) -> Result<T, Status> {
    if !(200..300).contains(&envelope.status) {
        let message: String = envelope.deserialize_body().unwrap_or_default();
        return Err(Status::new(http_status_to_grpc_code(envelope.status), message));
    }
    envelope
        .deserialize_body()
        .map_err(|e| Status::internal(e.to_string()))
}

#[tonic::async_trait]
impl QgisAdmin for AdminService {
    async fn checkout_project(
        &self,
        request: Request<rpc::CheckoutProjectRequest>,
    ) -> Result<Response<rpc::CacheInfo>, Status> {
        let req = request.into_inner();
        let envelope = self
            .send_unary(Message::CheckoutProject(CheckoutProjectMsg {
                uri: req.uri,
                pull: req.pull,
            }))
            .await?;
        let info: CacheInfo = unary_reply(envelope)?;
        Ok(Response::new(info.into()))
    }

    async fn drop_project(
        &self,
        request: Request<rpc::DropProjectRequest>,
    ) -> Result<Response<rpc::CacheInfo>, Status> {
        let req = request.into_inner();
        let envelope = self
            .send_unary(Message::DropProject(DropProjectMsg { uri: req.uri }))
            .await?;
        let info: CacheInfo = unary_reply(envelope)?;
        Ok(Response::new(info.into()))
    }

    async fn clear_cache(&self, _request: Request<rpc::Empty>) -> Result<Response<rpc::Empty>, Status> {
        let envelope = self.send_unary(Message::ClearCache(ClearCacheMsg {})).await?;
        unary_reply::<()>(envelope)?;
        Ok(Response::new(rpc::Empty {}))
    }

    type ListCacheStream = BoxStream<'static, Result<rpc::CacheInfo, Status>>;

    async fn list_cache(
        &self,
        request: Request<rpc::ListCacheRequest>,
    ) -> Result<Response<Self::ListCacheStream>, Status> {
        let req = request.into_inner();
        let msg = Message::ListCache(ListCacheMsg {
            status_filter: req.status_filter.map(|v| v as u8),
        });
        Ok(Response::new(self.stream_of::<CacheInfo, rpc::CacheInfo>(msg)))
    }

    type UpdateCacheStream = BoxStream<'static, Result<rpc::CacheInfo, Status>>;

    async fn update_cache(
        &self,
        _request: Request<rpc::Empty>,
    ) -> Result<Response<Self::UpdateCacheStream>, Status> {
        let msg = Message::UpdateCache(qjazz_ipc::messages::UpdateCacheMsg {});
        Ok(Response::new(self.stream_of::<CacheInfo, rpc::CacheInfo>(msg)))
    }

    type CatalogStream = BoxStream<'static, Result<rpc::CatalogItem, Status>>;

    async fn catalog(
        &self,
        request: Request<rpc::CatalogRequest>,
    ) -> Result<Response<Self::CatalogStream>, Status> {
        let req = request.into_inner();
        let msg = Message::Catalog(CatalogMsg { location: req.location });
        Ok(Response::new(self.stream_of::<CatalogItem, rpc::CatalogItem>(msg)))
    }

    async fn get_project_info(
        &self,
        request: Request<rpc::GetProjectInfoRequest>,
    ) -> Result<Response<rpc::ProjectInfo>, Status> {
        let req = request.into_inner();
        let envelope = self
            .send_unary(Message::ProjectInfo(GetProjectInfoMsg { uri: req.uri }))
            .await?;
        let info: ProjectInfo = unary_reply(envelope)?;
        Ok(Response::new(info.into()))
    }

    type ListPluginsStream = BoxStream<'static, Result<rpc::PluginInfo, Status>>;

    async fn list_plugins(
        &self,
        _request: Request<rpc::Empty>,
    ) -> Result<Response<Self::ListPluginsStream>, Status> {
        let msg = Message::Plugins(PluginsMsg {});
        Ok(Response::new(self.stream_of::<PluginInfo, rpc::PluginInfo>(msg)))
    }

    async fn get_config(&self, _request: Request<rpc::Empty>) -> Result<Response<rpc::ConfigReply>, Status> {
        let envelope = self.send_unary(Message::GetConfig(GetConfigMsg {})).await?;
        let json: String = unary_reply(envelope)?;
        Ok(Response::new(rpc::ConfigReply { json }))
    }

    async fn set_config(
        &self,
        request: Request<rpc::SetConfigRequest>,
    ) -> Result<Response<rpc::Empty>, Status> {
        let req = request.into_inner();
        let envelope = self
            .send_unary(Message::PutConfig(PutConfigMsg { config: Some(req.json) }))
            .await?;
        unary_reply::<()>(envelope)?;
        Ok(Response::new(rpc::Empty {}))
    }

    async fn get_env(&self, _request: Request<rpc::Empty>) -> Result<Response<rpc::EnvReply>, Status> {
        let envelope = self.send_unary(Message::Env(GetEnvMsg {})).await?;
        let variables: BTreeMap<String, String> = unary_reply(envelope)?;
        Ok(Response::new(rpc::EnvReply {
            variables: variables.into_iter().collect::<HashMap<_, _>>(),
        }))
    }

    async fn stats(&self, _request: Request<rpc::Empty>) -> Result<Response<rpc::StatsReply>, Status> {
        let envelope = self.send_unary(Message::Stats(StatsMsg {})).await?;
        let raw: BTreeMap<String, u64> = unary_reply(envelope)?;
        Ok(Response::new(rpc::StatsReply {
            num_requests: raw.get("num_requests").copied().unwrap_or(0),
            num_errors: raw.get("num_errors").copied().unwrap_or(0),
            uptime_secs: raw.get("uptime_secs").copied().unwrap_or(0) as u32,
            cached_projects: raw.get("cached_projects").copied().unwrap_or(0) as u32,
        }))
    }

    async fn set_server_serving_status(
        &self,
        request: Request<rpc::SetServingStatusRequest>,
    ) -> Result<Response<rpc::Empty>, Status> {
        let req = request.into_inner();
        let status = if req.serving {
            tonic_health::pb::health_check_response::ServingStatus::Serving
        } else {
            tonic_health::pb::health_check_response::ServingStatus::NotServing
        };
        self.health.clone().set_service_status(&req.service, status).await;
        Ok(Response::new(rpc::Empty {}))
    }

    async fn sleep(&self, request: Request<rpc::SleepRequest>) -> Result<Response<rpc::Empty>, Status> {
        let req = request.into_inner();
        let envelope = self.send_unary(Message::Sleep(SleepMsg { delay: req.delay_ms })).await?;
        unary_reply::<()>(envelope)?;
        Ok(Response::new(rpc::Empty {}))
    }
}
