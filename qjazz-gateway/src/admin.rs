//! Admin HTTP API (§4.C8): `/backends` CRUD over the live [`Pool`] and
//! `/config` GET/PATCH/PUT over the shared [`GatewayConfig`], gated by an
//! optional bearer token the same way `cloud-common/src/auth.rs` gates its
//! endpoints, but checked by hand against a configured token list rather than
//! through a `SecurityScheme` derive, since "no token configured" must mean
//! "no auth required" rather than "reject every request".

use std::sync::Arc;

use poem::web::Data;
use poem::{handler, Body, Endpoint, EndpointExt, Request, Response, Route};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{BackendConfig, GatewayConfig};
use crate::pool::Pool;

pub struct AdminApi {
    pool: Arc<Pool>,
    config: Arc<RwLock<GatewayConfig>>,
}

impl AdminApi {
    pub fn new(pool: Arc<Pool>, config: Arc<RwLock<GatewayConfig>>) -> Self {
        Self { pool, config }
    }
}

pub fn app(admin: Arc<AdminApi>) -> impl Endpoint {
    Route::new()
        .at("/backends", poem::get(list_backends).post(put_backend))
        .at(
            "/backends/:name",
            poem::get(get_backend).put(put_named_backend).delete(delete_backend),
        )
        .at("/config", poem::get(get_config).patch(patch_config).put(put_config))
        .data(admin)
}

fn unauthorized() -> Response {
    json_response(poem::http::StatusCode::UNAUTHORIZED, &json!({ "message": "unauthorized" }))
}

fn json_response(status: poem::http::StatusCode, value: &serde_json::Value) -> Response {
    let body = serde_json::to_string(value).unwrap_or_default();
    Response::builder().status(status).content_type("application/json").body(body)
}

async fn authorize(req: &Request, admin: &AdminApi) -> Result<(), Response> {
    let tokens = &admin.config.read().await.admin.bearer_tokens;
    if tokens.is_empty() {
        return Ok(());
    }
    let presented = req
        .header("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    match presented {
        Some(token) if tokens.contains(&token) => Ok(()),
        _ => Err(unauthorized()),
    }
}

#[handler]
async fn list_backends(req: &Request, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let backends = admin.pool.snapshot().await;
    json_response(poem::http::StatusCode::OK, &json!(backends.into_iter().collect::<std::collections::BTreeMap<_, _>>()))
}

#[handler]
async fn get_backend(req: &Request, poem::web::Path(name): poem::web::Path<String>, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    match admin.pool.get(&name).await {
        Some(channel) => json_response(poem::http::StatusCode::OK, &json!(channel.backend)),
        None => json_response(poem::http::StatusCode::NOT_FOUND, &json!({ "message": format!("no such backend: {name}") })),
    }
}

#[handler]
async fn put_backend(req: &Request, body: Body, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    #[derive(serde::Deserialize)]
    struct NamedBackend {
        name: String,
        #[serde(flatten)]
        backend: BackendConfig,
    }
    let Ok(bytes) = body.into_bytes().await else {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": "unreadable request body" }));
    };
    let parsed: Result<NamedBackend, _> = serde_json::from_slice(&bytes);
    match parsed {
        Ok(named) => add_backend(admin, named.name, named.backend).await,
        Err(e) => json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() })),
    }
}

#[handler]
async fn put_named_backend(
    req: &Request,
    poem::web::Path(name): poem::web::Path<String>,
    body: Body,
    Data(admin): Data<&Arc<AdminApi>>,
) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let Ok(bytes) = body.into_bytes().await else {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": "unreadable request body" }));
    };
    match serde_json::from_slice::<BackendConfig>(&bytes) {
        Ok(backend) => add_backend(admin, name, backend).await,
        Err(e) => json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() })),
    }
}

async fn add_backend(admin: &AdminApi, name: String, backend: BackendConfig) -> Response {
    match admin.pool.add_backend(name.clone(), backend.clone()).await {
        Ok(()) => {
            admin.config.write().await.backends.insert(name.clone(), backend);
            info!(backend = %name, "backend added via admin API");
            json_response(poem::http::StatusCode::OK, &json!({ "name": name }))
        }
        Err(e) => json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() })),
    }
}

#[handler]
async fn delete_backend(req: &Request, poem::web::Path(name): poem::web::Path<String>, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let removed = admin.pool.remove_backend(&name).await;
    admin.config.write().await.backends.remove(&name);
    match removed {
        Some(_) => json_response(poem::http::StatusCode::OK, &json!({ "name": name })),
        None => json_response(poem::http::StatusCode::NOT_FOUND, &json!({ "message": format!("no such backend: {name}") })),
    }
}

#[handler]
async fn get_config(req: &Request, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let config = admin.config.read().await;
    json_response(poem::http::StatusCode::OK, &json!(&*config))
}

/// Merge-patches the config (RFC 7396 style: object fields recurse, any
/// other value replaces) and reconciles the pool's channel set to match.
#[handler]
async fn patch_config(req: &Request, body: Body, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let Ok(bytes) = body.into_bytes().await else {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": "unreadable request body" }));
    };
    let Ok(patch) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": "invalid JSON" }));
    };

    let mut guard = admin.config.write().await;
    let mut current = match serde_json::to_value(&*guard) {
        Ok(v) => v,
        Err(e) => return json_response(poem::http::StatusCode::INTERNAL_SERVER_ERROR, &json!({ "message": e.to_string() })),
    };
    merge_patch(&mut current, &patch);
    let updated: GatewayConfig = match serde_json::from_value(current) {
        Ok(c) => c,
        Err(e) => return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() })),
    };

    if let Err(e) = admin.pool.init_channels(updated.backends.clone()).await {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() }));
    }
    *guard = updated;
    json_response(poem::http::StatusCode::OK, &json!(&*guard))
}

#[handler]
async fn put_config(req: &Request, body: Body, Data(admin): Data<&Arc<AdminApi>>) -> Response {
    if let Err(resp) = authorize(req, admin).await {
        return resp;
    }
    let Ok(bytes) = body.into_bytes().await else {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": "unreadable request body" }));
    };
    let replacement: GatewayConfig = match serde_json::from_slice(&bytes) {
        Ok(c) => c,
        Err(e) => return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() })),
    };
    if let Err(e) = admin.pool.init_channels(replacement.backends.clone()).await {
        return json_response(poem::http::StatusCode::BAD_REQUEST, &json!({ "message": e.to_string() }));
    }
    *admin.config.write().await = replacement.clone();
    json_response(poem::http::StatusCode::OK, &json!(replacement))
}

fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) = (&mut *target, patch) {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
    } else {
        *target = patch.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_patch_overwrites_scalars_and_recurses_into_objects() {
        let mut target = json!({
            "listen_address": "127.0.0.1:8080",
            "cors": { "mode": "same-origin" },
            "grace_period_secs": 10,
        });
        let patch = json!({
            "cors": { "mode": "all" },
            "grace_period_secs": 30,
        });
        merge_patch(&mut target, &patch);
        assert_eq!(target["listen_address"], "127.0.0.1:8080");
        assert_eq!(target["cors"]["mode"], "all");
        assert_eq!(target["grace_period_secs"], 30);
    }

    #[test]
    fn merge_patch_null_removes_the_key() {
        let mut target = json!({ "a": 1, "b": 2 });
        let patch = json!({ "b": null });
        merge_patch(&mut target, &patch);
        assert_eq!(target, json!({ "a": 1 }));
    }

    #[test]
    fn merge_patch_adds_new_backend_entries() {
        let mut target = json!({ "backends": {} });
        let patch = json!({ "backends": { "france": { "address": "http://127.0.0.1:23456" } } });
        merge_patch(&mut target, &patch);
        assert_eq!(target["backends"]["france"]["address"], "http://127.0.0.1:23456");
    }
}
