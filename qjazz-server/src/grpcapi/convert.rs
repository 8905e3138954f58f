//! Wire conversions between the worker pipe's MessagePack shapes
//! (`qjazz_ipc::messages`) and the gRPC wire shapes (`qjazz_api_grpc::rpc`),
//! grounded on `cloud-component-service/src/grpcapi/component.rs`'s
//! `From`-impl-per-field style for translating between a service's internal
//! model and its proto type.

use qjazz_api_grpc::rpc;
use qjazz_ipc::messages::{CacheInfo, CatalogItem, HttpMethod, LayerInfo, PluginInfo, ProjectInfo};
use tonic::Code;

impl From<CacheInfo> for rpc::CacheInfo {
    fn from(info: CacheInfo) -> Self {
        Self {
            uri: info.uri,
            status: info.status as u32,
            in_cache: info.in_cache,
            cache_id: info.cache_id,
            timestamp: info.timestamp,
            name: info.name,
            storage: info.storage,
            last_modified: info.last_modified,
            saved_version: info.saved_version,
            debug_metadata: info.debug_metadata.into_iter().collect(),
            last_hit: info.last_hit,
            hits: info.hits,
            pinned: info.pinned,
        }
    }
}

impl From<LayerInfo> for rpc::LayerInfo {
    fn from(layer: LayerInfo) -> Self {
        Self {
            layer_id: layer.layer_id,
            name: layer.name,
            source: layer.source,
            crs: layer.crs,
            is_valid: layer.is_valid,
            is_spatial: layer.is_spatial,
        }
    }
}

impl From<ProjectInfo> for rpc::ProjectInfo {
    fn from(info: ProjectInfo) -> Self {
        Self {
            status: info.status as u32,
            uri: info.uri,
            filename: info.filename,
            crs: info.crs,
            last_modified: info.last_modified,
            storage: info.storage,
            has_bad_layers: info.has_bad_layers,
            layers: info.layers.into_iter().map(Into::into).collect(),
            cache_id: info.cache_id,
        }
    }
}

impl From<CatalogItem> for rpc::CatalogItem {
    fn from(item: CatalogItem) -> Self {
        Self {
            uri: item.uri,
            name: item.name,
            storage: item.storage,
            last_modified: item.last_modified,
            public_uri: item.public_uri,
        }
    }
}

impl From<PluginInfo> for rpc::PluginInfo {
    fn from(plugin: PluginInfo) -> Self {
        Self {
            name: plugin.name,
            path: plugin.path,
            plugin_type: plugin.plugin_type,
            metadata_json: plugin.metadata.to_string(),
        }
    }
}

/// Maps the proto `ApiRequest.method` string onto the worker's `HttpMethod`
/// (§6 dispatch); unrecognized verbs fall back to `GET` rather than
/// rejecting the call, mirroring `resolver.py`'s permissive parsing.
pub fn parse_http_method(method: &str) -> HttpMethod {
    match method.to_ascii_uppercase().as_str() {
        "HEAD" => HttpMethod::Head,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "CONNECT" => HttpMethod::Connect,
        "OPTIONS" => HttpMethod::Options,
        "TRACE" => HttpMethod::Trace,
        "PATCH" => HttpMethod::Patch,
        _ => HttpMethod::Get,
    }
}

/// Maps a worker envelope's HTTP-style status (`§7`, `Kind::http_status`)
/// onto the closest gRPC status code for admin RPCs that return a single
/// value rather than streaming bytes with projected headers.
pub fn http_status_to_grpc_code(status: u16) -> Code {
    match status {
        200..=299 => Code::Ok,
        400 | 422 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 | 410 => Code::NotFound,
        409 => Code::Aborted,
        429 => Code::ResourceExhausted,
        499 => Code::Cancelled,
        503 => Code::Unavailable,
        504 => Code::DeadlineExceeded,
        _ => Code::Internal,
    }
}
