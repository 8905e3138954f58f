//! `QgisServer` RPC implementation (§4.C5 "Server service"): dispatches
//! `ExecuteOwsRequest`/`ExecuteApiRequest` to a pooled supervisor and
//! translates the worker's header-frame-then-chunks-then-sentinel reply
//! into gRPC response metadata plus a streamed body, grounded on
//! `cloud-component-service/src/grpcapi/component.rs`'s
//! `BoxStream<'static, Result<_, Status>>` streaming-RPC shape.

use std::sync::Arc;

use futures::stream::BoxStream;
use qjazz_ipc::messages::{ApiRequestMsg, Envelope, Message, OwsRequestMsg, PingMsg};
use qjazz_api_grpc::rpc;
use qjazz_api_grpc::rpc::qgis_server_server::{QgisServer, QgisServerServer};
use tonic::metadata::{MetadataKey, MetadataValue};
use tonic::{Request, Response, Status};

use super::convert::parse_http_method;
use super::to_status;
use crate::pool::SupervisorPool;

type ChunkStream = BoxStream<'static, Result<rpc::ResponseChunk, Status>>;

pub struct ServerService {
    pool: Arc<SupervisorPool>,
}

impl ServerService {
    pub fn new(pool: Arc<SupervisorPool>) -> Self {
        Self { pool }
    }

    pub fn into_server(self) -> QgisServerServer<Self> {
        QgisServerServer::new(self)
    }

    /// Shared tail of `ExecuteOwsRequest`/`ExecuteApiRequest`: acquires a
    /// supervisor, awaits the first (header) frame to populate response
    /// metadata, and wraps the rest of the reply as a chunk stream that
    /// keeps the supervisor checked out until fully drained.
    async fn execute_streaming(&self, msg: Message) -> Result<Response<ChunkStream>, Status> {
        let handle = self.pool.acquire().await;
        let mut rx = handle.execute(msg);
        let first = rx
            .recv()
            .await
            .ok_or_else(|| Status::internal("worker produced no reply"))?
            .map_err(to_status)?;

        let status_code = first.status;
        let headers: Vec<(String, String)> = first.deserialize_body().unwrap_or_default();

        let body = futures::stream::unfold((rx, Some(handle)), |(mut rx, guard)| async move {
            match rx.recv().await {
                Some(Ok(envelope)) if envelope.is_end_of_stream() => None,
                Some(Ok(envelope)) => {
                    let data = match envelope.body {
                        rmpv::Value::Binary(bytes) => bytes,
                        _ => Vec::new(),
                    };
                    Some((Ok(rpc::ResponseChunk { data }), (rx, guard)))
                }
                Some(Err(e)) => Some((Err(to_status(e)), (rx, guard))),
                None => None,
            }
        });

        let mut response = Response::new(Box::pin(body) as ChunkStream);
        let metadata = response.metadata_mut();
        metadata.insert(
            "x-reply-status-code",
            MetadataValue::try_from(status_code.to_string())
                .map_err(|e| Status::internal(e.to_string()))?,
        );
        for (name, value) in headers {
            let key = format!("x-reply-header-{}", name.to_ascii_lowercase());
            let (Ok(key), Ok(value)) = (
                MetadataKey::from_bytes(key.as_bytes()),
                MetadataValue::try_from(value),
            ) else {
                continue;
            };
            metadata.insert(key, value);
        }
        Ok(response)
    }
}

#[tonic::async_trait]
impl QgisServer for ServerService {
    type ExecuteOwsRequestStream = ChunkStream;
    type ExecuteApiRequestStream = ChunkStream;

    async fn execute_ows_request(
        &self,
        request: Request<rpc::OwsRequest>,
    ) -> Result<Response<Self::ExecuteOwsRequestStream>, Status> {
        let req = request.into_inner();
        let msg = Message::OwsRequest(OwsRequestMsg {
            service: req.service,
            request: req.request,
            target: req.target,
            url: req.url,
            version: req.version,
            direct: req.direct,
            options: req.options,
            headers: req.headers.into_iter().collect(),
            request_id: req.request_id,
            header_prefix: req.header_prefix,
            debug_report: req.debug_report,
        });
        self.execute_streaming(msg).await
    }

    async fn execute_api_request(
        &self,
        request: Request<rpc::ApiRequest>,
    ) -> Result<Response<Self::ExecuteApiRequestStream>, Status> {
        let req = request.into_inner();
        let msg = Message::ApiRequest(ApiRequestMsg {
            name: req.name,
            path: req.path,
            method: parse_http_method(&req.method),
            url: req.url,
            data: req.data,
            delegate: req.delegate,
            target: req.target,
            direct: req.direct,
            options: req.options,
            headers: req.headers.into_iter().collect(),
            request_id: req.request_id,
            header_prefix: req.header_prefix,
            debug_report: req.debug_report,
        });
        self.execute_streaming(msg).await
    }

    async fn ping(&self, request: Request<rpc::PingRequest>) -> Result<Response<rpc::PingReply>, Status> {
        let echo = request.into_inner().echo;
        let handle = self.pool.acquire().await;
        let envelope: Envelope = handle
            .send_unary(Message::Ping(PingMsg { echo }))
            .await
            .map_err(to_status)?;
        let reply: PingMsg = envelope
            .deserialize_body()
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(rpc::PingReply { echo: reply.echo }))
    }
}
