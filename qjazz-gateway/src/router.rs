//! HTTP router (§4.C7): longest-prefix route match, OWS/API decomposition,
//! WFS safety-limit injection, forwarded-URL reconstruction and streaming
//! gRPC-to-HTTP passthrough. The catch-all mount follows
//! `cli/golem/src/router.rs`'s `Route::new().at(...)` shape; the handler
//! itself is a `#[handler]` function pulling shared state via `Data`, as in
//! `cloud-service/src/api/connect.rs::ws`, since the route table and the
//! query/path decomposition are both data-driven at request time rather
//! than declarable up front.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use poem::http::{HeaderName, HeaderValue, Method, StatusCode};
use poem::web::Data;
use poem::{handler, Body, Endpoint, EndpointExt, Request, Response, Route};
use qjazz_api_grpc::rpc::{ApiRequest, OwsRequest};
use qjazz_common::error::CoreError;
use serde_json::json;
use tokio::sync::RwLock;
use tonic::Code;
use tracing::warn;

use crate::config::{BackendConfig, CrossOrigin, GatewayConfig};
use crate::pool::Pool;

pub struct Router {
    pool: Arc<Pool>,
    config: Arc<RwLock<GatewayConfig>>,
}

impl Router {
    pub fn new(pool: Arc<Pool>, config: Arc<RwLock<GatewayConfig>>) -> Self {
        Self { pool, config }
    }

    async fn cross_origin(&self) -> CrossOrigin {
        self.config.read().await.cors.cross_origin.clone()
    }
}

/// Mounts the serving router under every path, injecting it as shared
/// `Data` for [`serve`] to pick up.
pub fn app(router: Arc<Router>) -> impl Endpoint {
    Route::new()
        .at("/", serve)
        .at("/*path", serve)
        .data(router)
}

#[handler]
async fn serve(req: &Request, body: Body, Data(router): Data<&Arc<Router>>) -> Response {
    let origin = req.header("origin").map(str::to_string);
    if req.method() == Method::OPTIONS {
        return router.preflight_response(origin.as_deref()).await;
    }

    let mut response = match router.dispatch(req, body).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    };
    router.apply_cors(&mut response, origin.as_deref()).await;
    response
}

impl Router {
    async fn preflight_response(&self, origin: Option<&str>) -> Response {
        let mut response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("access-control-allow-methods", "GET, POST, HEAD, OPTIONS")
            .header(
                "access-control-allow-headers",
                "Authorization, Content-Type, X-Qgis-Project, X-Qgis-Ows-Service-Url, X-Qgis-Api-Service-Url",
            )
            .body(Body::empty());
        self.apply_cors(&mut response, origin).await;
        response
    }

    async fn apply_cors(&self, response: &mut Response, origin: Option<&str>) {
        let value = match (self.cross_origin().await, origin) {
            (CrossOrigin::All, _) => Some("*".to_string()),
            (CrossOrigin::SameOrigin, Some(origin)) => Some(origin.to_string()),
            (CrossOrigin::SameOrigin, None) => None,
            (CrossOrigin::Url { value }, _) => Some(value),
        };
        if let Some(value) = value {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("access-control-allow-origin"), value);
            }
        }
    }

    async fn dispatch(&self, req: &Request, body: Body) -> Result<Response, CoreError> {
        let path = req.uri().path().to_string();
        let query = parse_query(req.uri().query().unwrap_or(""));
        let headers: Vec<(String, String)> = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let Some((_name, channel)) = self.pool.resolve_route(&path).await else {
            return Err(CoreError::NotFound(format!("no route for {path}")));
        };
        let remainder = path
            .strip_prefix(&channel.backend.route_prefix)
            .unwrap_or(&path)
            .trim_start_matches('/')
            .to_string();

        let forwarded_url = forwarded_url(req, &path, req.uri().query());
        let method = req.method().clone();
        let forwarded_headers = channel.get_metadata(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let header_map: HashMap<String, String> = forwarded_headers.into_iter().collect();
        let request_id = find_header(&headers, "x-request-id").map(str::to_string);

        let stub = channel.stub()?;
        let timeout = Duration::from_secs(channel.backend.timeout_secs);

        if let Some(service) = query_param(&query, "SERVICE") {
            let project = query_param(&query, "MAP")
                .or_else(|| find_header(&headers, "x-qgis-project"))
                .map(str::to_string)
                .or_else(|| (!remainder.is_empty()).then(|| remainder.clone()));
            let direct = query_param(&query, "MAP").is_none()
                && find_header(&headers, "x-qgis-project").is_none();

            let effective_query = inject_wfs_limit(&query, service, &channel.backend);
            let msg = OwsRequest {
                service: service.to_string(),
                request: query_param(&effective_query, "REQUEST").unwrap_or_default().to_string(),
                target: project.clone().unwrap_or_default(),
                url: Some(rebuild_url(&forwarded_url, &effective_query)),
                version: query_param(&effective_query, "VERSION").map(str::to_string),
                direct,
                options: None,
                headers: header_map,
                request_id,
                header_prefix: None,
                debug_report: false,
            };
            let grpc_req = tonic::Request::new(msg);
            let mut server = stub.server.clone();
            let call = tokio::time::timeout(timeout, server.execute_ows_request(grpc_req));
            return self.stream_response(call).await;
        }

        let (path_project, rest) = match remainder.split_once("/_/") {
            Some((project, rest)) => (Some(project.to_string()), rest.to_string()),
            None => (None, remainder.clone()),
        };
        let (raw_api_name, api_path) = rest.split_once('/').unwrap_or((rest.as_str(), ""));
        let (api_name, suffix) = strip_api_suffix(raw_api_name);

        let query_project = query_param(&query, "MAP")
            .or_else(|| find_header(&headers, "x-qgis-project"))
            .map(str::to_string);

        if let (Some(_), Some(query_project)) = (&path_project, &query_project) {
            let mut location = format!(
                "{}/{}/_/{}{}/{}",
                channel.backend.route_prefix, query_project, api_name, suffix, api_path
            );
            location = location.trim_end_matches('/').to_string();
            let retained_query = drop_param(&query, "MAP");
            if !retained_query.is_empty() {
                location.push('?');
                location.push_str(&encode_query(&retained_query));
            }
            return Ok(Response::builder()
                .status(StatusCode::FOUND)
                .header("location", location)
                .body(Body::empty()));
        }

        let project = query_project.or(path_project.clone());
        let endpoint = channel
            .backend
            .api_endpoints
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(api_name))
            .ok_or_else(|| CoreError::NotFound(format!("no such API endpoint: {api_name}")))?;

        if suffix.eq_ignore_ascii_case(".html") && endpoint.delegate_to.is_some() && !endpoint.enable_html_delegate {
            let body = serde_json::to_string(&json!({
                "message": "HTML delegation disabled for this endpoint"
            }))
            .unwrap_or_default();
            return Ok(Response::builder()
                .status(StatusCode::UNSUPPORTED_MEDIA_TYPE)
                .content_type("application/json")
                .body(body));
        }

        let data = body
            .into_bytes()
            .await
            .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;

        let msg = ApiRequest {
            name: endpoint.name.clone(),
            path: api_path.to_string(),
            method: method.to_string(),
            url: forwarded_url,
            data: (!data.is_empty()).then(|| data.to_vec()),
            delegate: endpoint.delegate_to.is_some(),
            target: project.clone(),
            direct: project.is_none(),
            options: endpoint.delegate_to.clone(),
            headers: header_map,
            request_id,
            header_prefix: None,
            debug_report: false,
        };
        let grpc_req = tonic::Request::new(msg);
        let mut server = stub.server.clone();
        let call = tokio::time::timeout(timeout, server.execute_api_request(grpc_req));
        self.stream_response(call).await
    }

    async fn stream_response<F>(&self, call: tokio::time::Timeout<F>) -> Result<Response, CoreError>
    where
        F: std::future::Future<
            Output = Result<tonic::Response<tonic::Streaming<qjazz_api_grpc::rpc::ResponseChunk>>, tonic::Status>,
        >,
    {
        let outcome = call.await.map_err(|_| CoreError::Timeout)?;
        let grpc_response = outcome.map_err(status_to_core_error)?;

        let metadata = grpc_response.metadata().clone();
        let status = metadata
            .get("x-reply-status-code")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(200);

        let mut builder = Response::builder().status(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        );
        for key in metadata.keys() {
            let tonic::metadata::KeyRef::Ascii(key) = key else {
                continue;
            };
            let name = key.as_str();
            let Some(header_name) = name.strip_prefix("x-reply-header-") else {
                continue;
            };
            if let Some(value) = metadata.get(key).and_then(|v| v.to_str().ok()) {
                builder = builder.header(header_name, value);
            }
        }

        let stream = grpc_response.into_inner().map(|item| {
            item.map(|chunk| bytes::Bytes::from(chunk.data))
                .map_err(std::io::Error::other)
        });
        Ok(builder.body(Body::from_bytes_stream(stream)))
    }
}

fn status_to_core_error(status: tonic::Status) -> CoreError {
    match status.code() {
        Code::NotFound => CoreError::NotFound(status.message().to_string()),
        Code::Unavailable => CoreError::BackendUnavailable(status.message().to_string()),
        Code::PermissionDenied => CoreError::ResourceNotAllowed(status.message().to_string()),
        Code::InvalidArgument => CoreError::InvalidArgument(status.message().to_string()),
        Code::DeadlineExceeded => CoreError::Timeout,
        Code::Internal => CoreError::Internal(status.message().to_string()),
        _ => CoreError::Internal(status.message().to_string()),
    }
}

fn error_response(err: &CoreError) -> Response {
    let status = err.kind().http_status();
    warn!(%err, status, "request failed");
    let body = serde_json::to_string(&json!({ "message": err.to_string() })).unwrap_or_default();
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .content_type("application/json")
        .body(body)
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn query_param<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn drop_param(query: &[(String, String)], name: &str) -> Vec<(String, String)> {
    query
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case(name))
        .cloned()
        .collect()
}

fn encode_query(query: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish()
}

/// Strips a `.html`/`.json` suffix from an API name segment (§4.C7 rule 3),
/// returning the bare name and the stripped suffix (kept so redirects can
/// preserve it).
fn strip_api_suffix(name: &str) -> (&str, &str) {
    for suffix in [".html", ".json"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return (stripped, suffix);
        }
    }
    (name, "")
}

/// WFS GetFeature safety cap (§4.C7): clamps `COUNT` (2.x) or `MAXFEATURES`
/// (1.x) to the backend's configured limit.
fn inject_wfs_limit(query: &[(String, String)], service: &str, backend: &BackendConfig) -> Vec<(String, String)> {
    let Some(limit) = backend.getfeature_limit else {
        return query.to_vec();
    };
    if !service.eq_ignore_ascii_case("WFS") {
        return query.to_vec();
    }
    let is_get_feature = query_param(query, "REQUEST")
        .map(|v| v.eq_ignore_ascii_case("GetFeature"))
        .unwrap_or(false);
    if !is_get_feature {
        return query.to_vec();
    }
    let is_v2 = query_param(query, "VERSION")
        .map(|v| v.starts_with('2'))
        .unwrap_or(false);
    let param_name = if is_v2 { "COUNT" } else { "MAXFEATURES" };
    let user_count = query_param(query, param_name).and_then(|v| v.parse::<u32>().ok());
    let clamped = user_count.map(|c| c.min(limit)).unwrap_or(limit);

    let mut result = drop_param(query, param_name);
    result.push((param_name.to_string(), clamped.to_string()));
    result
}

fn rebuild_url(base: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return base.to_string();
    }
    format!("{base}?{}", encode_query(query))
}

/// Reconstructs the public URL the renderer should embed in absolute links
/// (§4.C7 "Forwarded URL"), preferring `X-Forwarded-Host`, then `Forwarded`,
/// then `Host`.
fn forwarded_url(req: &Request, path: &str, query: Option<&str>) -> String {
    let scheme = if req
        .header("x-forwarded-proto")
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
    {
        "https"
    } else {
        "http"
    };
    let host = req
        .header("x-forwarded-host")
        .map(str::to_string)
        .or_else(|| {
            req.header("forwarded").and_then(|value| {
                value
                    .split(';')
                    .find_map(|part| part.trim().strip_prefix("host="))
                    .map(str::to_string)
            })
        })
        .or_else(|| req.header("host").map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());

    match query {
        Some(query) if !query.is_empty() => format!("{scheme}://{host}{path}?{query}"),
        _ => format!("{scheme}://{host}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_lookup_is_case_insensitive() {
        let query = parse_query("service=WFS&REQUEST=GetFeature&Version=2.0.0");
        assert_eq!(query_param(&query, "SERVICE"), Some("WFS"));
        assert_eq!(query_param(&query, "request"), Some("GetFeature"));
        assert_eq!(query_param(&query, "version"), Some("2.0.0"));
        assert_eq!(query_param(&query, "missing"), None);
    }

    #[test]
    fn strip_api_suffix_recognizes_html_and_json() {
        assert_eq!(strip_api_suffix("wfs3.html"), ("wfs3", ".html"));
        assert_eq!(strip_api_suffix("wfs3.json"), ("wfs3", ".json"));
        assert_eq!(strip_api_suffix("wfs3"), ("wfs3", ""));
    }

    #[test]
    fn wfs_limit_clamps_count_for_v2_getfeature() {
        let backend = BackendConfig {
            getfeature_limit: Some(100),
            ..Default::default()
        };
        let query = parse_query("SERVICE=WFS&REQUEST=GetFeature&VERSION=2.0.0&COUNT=5000");
        let limited = inject_wfs_limit(&query, "WFS", &backend);
        assert_eq!(query_param(&limited, "COUNT"), Some("100"));
    }

    #[test]
    fn wfs_limit_uses_maxfeatures_for_v1() {
        let backend = BackendConfig {
            getfeature_limit: Some(50),
            ..Default::default()
        };
        let query = parse_query("SERVICE=WFS&REQUEST=GetFeature&VERSION=1.1.0");
        let limited = inject_wfs_limit(&query, "WFS", &backend);
        assert_eq!(query_param(&limited, "MAXFEATURES"), Some("50"));
    }

    #[test]
    fn wfs_limit_left_untouched_without_backend_limit() {
        let backend = BackendConfig::default();
        let query = parse_query("SERVICE=WFS&REQUEST=GetFeature&COUNT=5000");
        let limited = inject_wfs_limit(&query, "WFS", &backend);
        assert_eq!(query_param(&limited, "COUNT"), Some("5000"));
    }

    #[test]
    fn wfs_limit_ignored_for_non_getfeature_requests() {
        let backend = BackendConfig {
            getfeature_limit: Some(10),
            ..Default::default()
        };
        let query = parse_query("SERVICE=WFS&REQUEST=DescribeFeatureType");
        let limited = inject_wfs_limit(&query, "WFS", &backend);
        assert_eq!(query_param(&limited, "COUNT"), None);
        assert_eq!(query_param(&limited, "MAXFEATURES"), None);
    }

    #[test]
    fn rebuild_url_appends_encoded_query_only_when_present() {
        assert_eq!(rebuild_url("http://host/path", &[]), "http://host/path");
        let query = vec![("SERVICE".to_string(), "WFS".to_string())];
        assert_eq!(rebuild_url("http://host/path", &query), "http://host/path?SERVICE=WFS");
    }
}
