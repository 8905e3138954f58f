//! The worker's message dispatch table (§4.C3), grounded on
//! `qjazz_rpc/_op_cache.py` and `qjazz_rpc/_op_requests.py`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use qjazz_cache::{
    CacheEntry, CacheManager, CheckoutStatus, CheckoutSubject, ProjectLoader, ProjectMetadata,
    ProtocolHandler,
};
use qjazz_ipc::messages::{
    ApiRequestMsg, CacheInfo, CatalogItem, CheckoutProjectMsg, DropProjectMsg, GetProjectInfoMsg,
    LayerInfo, Message, OwsRequestMsg, ProjectInfo,
};
use qjazz_ipc::Envelope;

use crate::cancellation::Cancellation;
use crate::config::WorkerConfig;
use crate::renderer::{LoadFlags, MemoryResponse, Renderer, RendererRequest};

/// Bridges [`crate::renderer::Renderer::load_project`] into the
/// [`qjazz_cache::ProjectLoader`] contract the cache manager expects,
/// since the two crates don't depend on each other's trait.
struct RendererLoader<R: Renderer> {
    renderer: Arc<R>,
}

impl<R: Renderer> ProjectLoader<R::Project> for RendererLoader<R> {
    fn load(
        &self,
        md: &ProjectMetadata,
        config: &qjazz_cache::ProjectsConfig,
    ) -> Result<R::Project, qjazz_cache::CacheError> {
        self.renderer.load_project(&md.uri, LoadFlags::from_config(config))
    }

    fn release(&self, project: &R::Project) {
        self.renderer.release_project_config(project);
    }
}

/// What the dispatch loop should do after handling one message: send the
/// produced frames and keep looping, or send them and exit.
pub enum DispatchOutcome {
    Continue(Vec<Envelope>),
    Quit(Vec<Envelope>),
}

pub struct WorkerState<R: Renderer> {
    pub cache: CacheManager<R::Project>,
    pub config: WorkerConfig,
    pub renderer: Arc<R>,
    pub cancellation: Cancellation,
    pub cache_id: String,
}

impl<R: Renderer> WorkerState<R> {
    pub fn new(config: WorkerConfig, renderer: Arc<R>, cancellation: Cancellation, cache_id: String) -> Self {
        let loader = Arc::new(RendererLoader {
            renderer: renderer.clone(),
        });
        let routes = build_routes(&config.projects);
        let mut cache = CacheManager::new(config.projects.clone(), routes, loader);
        cache.register_handler(Arc::new(qjazz_cache::handlers::FileProtocolHandler::new()));
        Self {
            cache,
            config,
            renderer,
            cancellation,
            cache_id,
        }
    }

    pub fn dispatch(&mut self, msg: Message) -> DispatchOutcome {
        match msg {
            Message::Ping(ping) => DispatchOutcome::Continue(vec![ok_envelope(&ping)]),
            Message::Quit(_) => DispatchOutcome::Quit(vec![ok_unit()]),
            Message::OwsRequest(req) => DispatchOutcome::Continue(self.handle_ows(req)),
            Message::ApiRequest(req) => DispatchOutcome::Continue(self.handle_api(req)),
            Message::CheckoutProject(req) => DispatchOutcome::Continue(vec![self.handle_checkout(req)]),
            Message::DropProject(req) => DispatchOutcome::Continue(vec![self.handle_drop(req)]),
            Message::ClearCache(_) => {
                self.cache.clear();
                DispatchOutcome::Continue(vec![ok_unit()])
            }
            Message::ListCache(req) => {
                DispatchOutcome::Continue(self.handle_list_cache(req.status_filter))
            }
            Message::UpdateCache(_) => DispatchOutcome::Continue(self.handle_update_cache()),
            Message::ProjectInfo(req) => DispatchOutcome::Continue(vec![self.handle_project_info(req)]),
            Message::Plugins(_) => DispatchOutcome::Continue(vec![empty_stream()]),
            Message::Catalog(req) => DispatchOutcome::Continue(self.handle_catalog(req.location)),
            Message::PutConfig(req) => DispatchOutcome::Continue(vec![self.handle_put_config(req.config)]),
            Message::GetConfig(_) => DispatchOutcome::Continue(vec![self.handle_get_config()]),
            Message::Env(_) => DispatchOutcome::Continue(vec![self.handle_get_env()]),
            Message::Stats(_) => DispatchOutcome::Continue(vec![ok_envelope(&self.stats_body())]),
            Message::Sleep(req) => DispatchOutcome::Continue(vec![self.handle_sleep(req.delay)]),
        }
    }

    fn handle_checkout(&mut self, req: CheckoutProjectMsg) -> Envelope {
        let url = qjazz_cache::ResourceUri::parse(&req.uri);
        match self.cache.checkout(&url) {
            Ok((subject, status)) => {
                let applied = if req.pull {
                    self.apply_pull(subject, status)
                } else {
                    Ok(self.cache_info_for(subject, status))
                };
                match applied {
                    Ok(info) => ok_envelope(&info),
                    Err(err) => error_envelope(&err),
                }
            }
            Err(err) => error_envelope(&err),
        }
    }

    /// `pull=true` additionally pins the entry (§4.C3 supplement).
    fn apply_pull(
        &mut self,
        subject: Option<CheckoutSubject>,
        status: CheckoutStatus,
    ) -> Result<CacheInfo, qjazz_cache::CacheError> {
        let md = match subject {
            Some(CheckoutSubject::Metadata(md)) => md,
            Some(CheckoutSubject::Uri(uri)) => self
                .cache
                .get(&uri)
                .map(|e| e.md.clone())
                .ok_or_else(|| qjazz_cache::CacheError::NotFound(uri))?,
            None => return Ok(CacheInfo {
                status: status as u8,
                ..Default::default()
            }),
        };
        let uri = md.uri.clone();
        let (_, applied) = self.cache.update(md, status, true)?;
        if let Some(entry) = self.cache.get_mut(&uri) {
            entry.pin();
        }
        Ok(self.cache_info_from_entry(&uri, applied))
    }

    fn cache_info_for(&self, subject: Option<CheckoutSubject>, status: CheckoutStatus) -> CacheInfo {
        match subject {
            Some(CheckoutSubject::Metadata(md)) => CacheInfo {
                uri: md.uri,
                status: status as u8,
                in_cache: false,
                cache_id: self.cache_id.clone(),
                name: Some(md.name),
                storage: md.storage,
                last_modified: Some(format_timestamp(md.last_modified)),
                saved_version: md.saved_version,
                ..Default::default()
            },
            Some(CheckoutSubject::Uri(uri)) => self.cache_info_from_entry(&uri, status),
            None => CacheInfo {
                status: status as u8,
                cache_id: self.cache_id.clone(),
                ..Default::default()
            },
        }
    }

    fn cache_info_from_entry(&self, uri: &str, status: CheckoutStatus) -> CacheInfo {
        match self.cache.get(uri) {
            Some(entry) => cache_info_from_entry(entry, status, &self.cache_id),
            None => CacheInfo {
                uri: uri.to_string(),
                status: status as u8,
                in_cache: false,
                cache_id: self.cache_id.clone(),
                ..Default::default()
            },
        }
    }

    fn handle_drop(&mut self, req: DropProjectMsg) -> Envelope {
        match self.cache.remove(&req.uri) {
            Some(_) => ok_envelope(&CacheInfo {
                uri: req.uri,
                status: CheckoutStatus::Removed as u8,
                in_cache: false,
                cache_id: self.cache_id.clone(),
                ..Default::default()
            }),
            None => Envelope::new(404, &req.uri).expect("serializing a string cannot fail"),
        }
    }

    fn handle_list_cache(&self, status_filter: Option<u8>) -> Vec<Envelope> {
        let mut frames: Vec<Envelope> = self
            .cache
            .iter()
            .map(|entry| cache_info_from_entry(entry, CheckoutStatus::Unchanged, &self.cache_id))
            .filter(|info| status_filter.map(|f| f == info.status).unwrap_or(true))
            .map(|info| Envelope::chunk(rmp_serde::to_vec_named(&info).unwrap_or_default()))
            .collect();
        frames.push(Envelope::end_of_stream());
        frames
    }

    fn handle_update_cache(&mut self) -> Vec<Envelope> {
        let updates = match self.cache.update_cache() {
            Ok(updates) => updates,
            Err(err) => return vec![error_envelope(&err), Envelope::end_of_stream()],
        };
        let mut frames: Vec<Envelope> = updates
            .into_iter()
            .map(|(uri, status)| match self.cache.get(&uri) {
                Some(entry) => cache_info_from_entry(entry, status, &self.cache_id),
                None => CacheInfo {
                    uri,
                    status: status as u8,
                    in_cache: false,
                    cache_id: self.cache_id.clone(),
                    ..Default::default()
                },
            })
            .map(|info| Envelope::chunk(rmp_serde::to_vec_named(&info).unwrap_or_default()))
            .collect();
        frames.push(Envelope::end_of_stream());
        frames
    }

    fn handle_catalog(&self, location: Option<String>) -> Vec<Envelope> {
        let mut frames = Vec::new();
        for (loc, root) in self.cache.locations(location.as_deref()) {
            if let Ok(items) = list_catalog_items(&self.cache, &loc, &root) {
                for item in items {
                    frames.push(Envelope::chunk(rmp_serde::to_vec_named(&item).unwrap_or_default()));
                }
            }
        }
        frames.push(Envelope::end_of_stream());
        frames
    }

    fn handle_project_info(&mut self, req: GetProjectInfoMsg) -> Envelope {
        let url = qjazz_cache::ResourceUri::parse(&req.uri);
        match self.cache.checkout(&url) {
            Ok((Some(CheckoutSubject::Uri(uri)), status)) if status != CheckoutStatus::NotFound => {
                match self.cache.get(&uri) {
                    Some(entry) => ok_envelope(&project_info_from_entry(entry, &self.cache_id)),
                    None => Envelope::new(404, &req.uri).expect("serializing a string cannot fail"),
                }
            }
            _ => Envelope::new(404, &req.uri).expect("serializing a string cannot fail"),
        }
    }

    fn handle_put_config(&mut self, config_json: Option<String>) -> Envelope {
        match config_json {
            None => ok_unit(),
            Some(raw) => match serde_json::from_str::<WorkerConfig>(&raw) {
                Ok(config) => {
                    self.config = config;
                    ok_unit()
                }
                Err(err) => Envelope::new(400, &err.to_string()).expect("serializing a string cannot fail"),
            },
        }
    }

    fn handle_get_config(&self) -> Envelope {
        match serde_json::to_string(&self.config) {
            Ok(json) => ok_envelope(&json),
            Err(err) => error_envelope(&qjazz_cache::CacheError::Internal(err.to_string())),
        }
    }

    fn handle_get_env(&self) -> Envelope {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        ok_envelope(&vars)
    }

    fn stats_body(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        stats.insert("cached_projects".to_string(), self.cache.len() as u64);
        stats
    }

    fn handle_sleep(&self, delay_ms: u64) -> Envelope {
        self.cancellation.reset();
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(delay_ms);
        while std::time::Instant::now() < deadline {
            if self.cancellation.is_cancelled() {
                return Envelope::new(499, &"cancelled").expect("serializing a string cannot fail");
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        ok_unit()
    }

    fn handle_ows(&mut self, req: OwsRequestMsg) -> Vec<Envelope> {
        let mut url = format!(
            "{}?SERVICE={}&REQUEST={}",
            req.url.unwrap_or_default(),
            req.service,
            req.request
        );
        if let Some(version) = &req.version {
            url.push_str(&format!("&VERSION={version}"));
        }
        if let Some(options) = &req.options {
            url.push_str(&format!("&{options}"));
        }
        self.run_generic_request(
            url,
            "GET".to_string(),
            req.target,
            req.direct,
            None,
            req.headers,
            req.request_id,
        )
    }

    fn handle_api(&mut self, req: ApiRequestMsg) -> Vec<Envelope> {
        let mut url = req.url.clone();
        if !req.path.is_empty() {
            url = format!("{}/{}", url.trim_end_matches('/'), req.path.trim_start_matches('/'));
        }
        if let Some(options) = &req.options {
            url.push_str(&format!("?{options}"));
        }
        let method = format!("{:?}", req.method).to_uppercase();
        self.run_generic_request(
            url,
            method,
            req.target.unwrap_or_default(),
            req.direct,
            req.data,
            req.headers,
            req.request_id,
        )
    }

    /// Shared tail of OWS/API dispatch (§4.C3.1): checkout the target
    /// project (if named), invoke the renderer, frame the response.
    fn run_generic_request(
        &mut self,
        url: String,
        method: String,
        target: String,
        allow_direct: bool,
        data: Option<Vec<u8>>,
        headers: Vec<(String, String)>,
        request_id: Option<String>,
    ) -> Vec<Envelope> {
        let mut response = MemoryResponse::default();
        let project = if target.is_empty() {
            None
        } else {
            match self.request_project_from_cache(&target, allow_direct) {
                Ok(Some(uri)) => {
                    let entry = self.cache.get_mut(&uri).expect("checked out entry must exist");
                    entry.hit_me();
                    response.set_header(
                        "x-qgis-cache",
                        if entry.hits <= 1 { "MISS" } else { "HIT" },
                    );
                    if let Some(id) = &request_id {
                        response.set_header("x-request-id", id.clone());
                    }
                    Some(self.cache.get(&uri).unwrap().project.clone())
                }
                Ok(None) => return vec![Envelope::end_of_stream()],
                Err(status) => {
                    return vec![Envelope::new(status, &target).expect("serializing a string cannot fail"), Envelope::end_of_stream()];
                }
            }
        };

        let request = RendererRequest {
            url,
            method,
            headers,
            data,
        };
        self.renderer
            .handle_request(&request, &mut response, project.as_deref());

        let mut frames = vec![Envelope::new(response.status, &response.headers)
            .expect("serializing a header list cannot fail")];
        for chunk in response.chunks {
            frames.push(Envelope::chunk(chunk));
        }
        frames.push(Envelope::end_of_stream());
        frames
    }

    /// Returns `Ok(Some(uri))` when a usable entry is resident after this
    /// call, `Ok(None)` when an error reply was already queued (REMOVED,
    /// NOTFOUND, capacity exhausted, load disabled), matching
    /// `_op_requests.py::request_project_from_cache`.
    fn request_project_from_cache(
        &mut self,
        target: &str,
        allow_direct: bool,
    ) -> Result<Option<String>, u16> {
        let url = self
            .cache
            .resolve_path(target, allow_direct)
            .map_err(|e| e.kind().http_status())?;
        let (subject, status) = self
            .cache
            .checkout(&url)
            .map_err(|e| e.kind().http_status())?;
        match status {
            CheckoutStatus::NeedUpdate => {
                let uri = match &subject {
                    Some(CheckoutSubject::Uri(uri)) => uri.clone(),
                    _ => return Err(500),
                };
                if self.config.projects.reload_outdated_project_on_request {
                    let md = self.cache.get(&uri).unwrap().md.clone();
                    self.cache
                        .update(md, status, false)
                        .map_err(|e| e.kind().http_status())?;
                }
                Ok(Some(uri))
            }
            CheckoutStatus::Unchanged | CheckoutStatus::Updated => match subject {
                Some(CheckoutSubject::Uri(uri)) => Ok(Some(uri)),
                _ => Err(500),
            },
            CheckoutStatus::New => {
                let md = match subject {
                    Some(CheckoutSubject::Metadata(md)) => md,
                    _ => return Err(500),
                };
                if !self.config.projects.load_project_on_request {
                    return Err(404);
                }
                let uri = md.uri.clone();
                self.cache
                    .update(md, status, false)
                    .map_err(|e| e.kind().http_status())?;
                Ok(Some(uri))
            }
            CheckoutStatus::Removed => Err(410),
            CheckoutStatus::NotFound => Err(404),
        }
    }
}

fn build_routes(config: &qjazz_cache::ProjectsConfig) -> Vec<qjazz_cache::Route> {
    config
        .search_paths
        .iter()
        .filter_map(|(location, root)| {
            qjazz_cache::Route::new(location, qjazz_cache::ResourceUri::parse(root)).ok()
        })
        .collect()
}

fn list_catalog_items<P>(
    cache: &CacheManager<P>,
    location: &str,
    root: &qjazz_cache::ResourceUri,
) -> Result<Vec<CatalogItem>, qjazz_cache::CacheError> {
    let handler = cache.handler_for(&root.scheme)?;
    let projects = handler.list_projects(root)?;
    Ok(projects
        .into_iter()
        .map(|md| {
            let public_uri = handler.public_path(&md.uri, location, root);
            CatalogItem {
                uri: md.uri,
                name: md.name,
                storage: md.storage.unwrap_or_default(),
                last_modified: format_timestamp(md.last_modified),
                public_uri,
            }
        })
        .collect())
}

fn cache_info_from_entry<P>(entry: &CacheEntry<P>, status: CheckoutStatus, cache_id: &str) -> CacheInfo {
    let mut debug_metadata = BTreeMap::new();
    if let Some(mem) = entry.debug_meta.load_memory_bytes {
        debug_metadata.insert("load_memory_bytes".to_string(), mem);
    }
    debug_metadata.insert("load_time_ms".to_string(), entry.debug_meta.load_time_ms as i64);

    CacheInfo {
        uri: entry.md.uri.clone(),
        status: status as u8,
        in_cache: true,
        cache_id: cache_id.to_string(),
        timestamp: Some(entry.timestamp as i64),
        name: Some(entry.md.name.clone()),
        storage: entry.md.storage.clone(),
        last_modified: Some(format_timestamp(entry.md.last_modified)),
        saved_version: entry.md.saved_version.clone(),
        debug_metadata,
        last_hit: entry.last_hit as i64,
        hits: entry.hits,
        pinned: entry.pinned,
    }
}

fn project_info_from_entry<P>(entry: &CacheEntry<P>, cache_id: &str) -> ProjectInfo {
    ProjectInfo {
        status: CheckoutStatus::Unchanged as u8,
        uri: entry.md.uri.clone(),
        filename: entry.md.uri.clone(),
        crs: String::new(),
        last_modified: entry.md.last_modified,
        storage: entry.md.storage.clone().unwrap_or_default(),
        has_bad_layers: false,
        layers: Vec::<LayerInfo>::new(),
        cache_id: cache_id.to_string(),
    }
}

fn format_timestamp(epoch_secs: i64) -> String {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .map(|dt| dt.to_rfc2822())
        .unwrap_or_default()
}

fn ok_envelope<T: serde::Serialize>(body: &T) -> Envelope {
    Envelope::ok(body).expect("serializing a dispatch reply body cannot fail")
}

fn ok_unit() -> Envelope {
    Envelope::ok(&()).expect("serializing unit cannot fail")
}

fn empty_stream() -> Envelope {
    Envelope::end_of_stream()
}

fn error_envelope(err: &qjazz_cache::CacheError) -> Envelope {
    use qjazz_common::error::SafeDisplay;
    Envelope::new(err.kind().http_status(), &err.to_safe_string())
        .expect("serializing an error string cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::placeholder::PlaceholderRenderer;
    use std::fs;

    fn state_with_search_path(root: &std::path::Path) -> WorkerState<PlaceholderRenderer> {
        let mut config = WorkerConfig::default();
        config.projects.search_paths.insert(
            "/public".to_string(),
            format!("file://{}", root.to_string_lossy()),
        );
        WorkerState::new(
            config,
            Arc::new(PlaceholderRenderer::default()),
            Cancellation::install().expect("installing SIGHUP handler in tests"),
            "test-cache".to_string(),
        )
    }

    #[test]
    fn ping_echoes_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_search_path(dir.path());
        match state.dispatch(Message::Ping(qjazz_ipc::messages::PingMsg { echo: None })) {
            DispatchOutcome::Continue(frames) => {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].status, 200);
            }
            DispatchOutcome::Quit(_) => panic!("ping must not quit"),
        }
    }

    #[test]
    fn quit_returns_quit_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_search_path(dir.path());
        match state.dispatch(Message::Quit(qjazz_ipc::messages::QuitMsg {})) {
            DispatchOutcome::Quit(frames) => assert_eq!(frames[0].status, 200),
            DispatchOutcome::Continue(_) => panic!("quit must quit"),
        }
    }

    #[test]
    fn ows_request_against_an_uncached_project_loads_it_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.qgs"), b"").unwrap();
        let mut state = state_with_search_path(dir.path());

        let frames = state.handle_ows(OwsRequestMsg {
            service: "WMS".to_string(),
            request: "GetMap".to_string(),
            target: "/public/a.qgs".to_string(),
            url: Some("/ows".to_string()),
            version: None,
            direct: false,
            options: None,
            headers: Vec::new(),
            request_id: Some("req-1".to_string()),
            header_prefix: None,
            debug_report: false,
        });

        assert_eq!(state.cache.len(), 1);
        assert!(frames.iter().any(|f| f.status == 200));
        assert!(frames.last().unwrap().is_end_of_stream());
    }

    #[test]
    fn ows_request_against_a_missing_project_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_search_path(dir.path());

        let frames = state.handle_ows(OwsRequestMsg {
            service: "WMS".to_string(),
            request: "GetMap".to_string(),
            target: "/public/missing.qgs".to_string(),
            url: Some("/ows".to_string()),
            version: None,
            direct: false,
            options: None,
            headers: Vec::new(),
            request_id: None,
            header_prefix: None,
            debug_report: false,
        });

        assert_eq!(frames[0].status, 404);
    }

    #[test]
    fn sleep_completes_normally_when_not_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_search_path(dir.path());
        let envelope = state.handle_sleep(20);
        assert_eq!(envelope.status, 200);
    }
}
