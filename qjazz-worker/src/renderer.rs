//! The renderer contract consumed by the worker (§6 "Renderer (native
//! library) contract"). The renderer itself is an out-of-scope binary
//! dependency; this module only fixes the interface shape so the dispatch
//! loop can be written and tested against a double.

use qjazz_cache::ProjectsConfig;

/// Flags derived from configuration that govern how a project loads
/// (`trust_metadata`, `disable_print_layouts`, `readonly`,
/// `ignore_bad_layers` — §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadFlags {
    pub trust_metadata: bool,
    pub disable_print_layouts: bool,
    pub readonly: bool,
    pub ignore_bad_layers: bool,
}

impl LoadFlags {
    pub fn from_config(config: &ProjectsConfig) -> Self {
        Self {
            trust_metadata: config.trust_layer_metadata,
            disable_print_layouts: config.disable_getprint,
            readonly: config.force_readonly_layers,
            ignore_bad_layers: config.ignore_bad_layers,
        }
    }
}

/// A request built from an OWS or API message (§4.C3.1 step 2).
#[derive(Debug, Clone)]
pub struct RendererRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<Vec<u8>>,
}

/// Accumulates a response as the renderer writes to it: status, headers,
/// and body chunks. In production the chunks are framed back over the
/// pipe as they arrive (bounded by `max_chunk_size`); this in-memory form
/// is what the dispatch loop hands frames from once `handle_request`
/// returns, and what test doubles populate directly.
#[derive(Debug, Clone, Default)]
pub struct MemoryResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Vec<u8>>,
}

impl MemoryResponse {
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn write_chunk(&mut self, data: Vec<u8>) {
        self.chunks.push(data);
    }
}

/// One process-wide instance, initialized once at worker startup
/// (`init_server`). `Project` is the opaque loaded-project handle; this
/// crate never inspects its contents.
pub trait Renderer: Send + Sync {
    type Project: Send + Sync;

    /// Loads a project from its resolved URI. Fails with
    /// `UnreadableResource` or `StrictCheckingFailure` depending on
    /// configuration (§4.C1 `load_project`).
    fn load_project(
        &self,
        uri: &str,
        flags: LoadFlags,
    ) -> Result<Self::Project, qjazz_cache::CacheError>;

    /// Releases per-project state held by the renderer, called when the
    /// cache drops an entry.
    fn release_project_config(&self, project: &Self::Project);

    /// Synchronous request dispatch: writes status/headers/body to
    /// `response` via `project`, or process-wide if `project` is `None`
    /// (status/version endpoints with no target project).
    fn handle_request(
        &self,
        request: &RendererRequest,
        response: &mut MemoryResponse,
        project: Option<&Self::Project>,
    );

    /// Installs the API-delegation shim (called once at startup).
    fn register_api(&self, _name: &str) {}
}

pub mod placeholder {
    //! Stand-in implementation of [`Renderer`] used until the native
    //! rendering engine is wired in behind this trait. It never actually
    //! renders anything; it just reports back what it was asked to do.
    //! Exercises the dispatch loop end-to-end (both in this crate's tests
    //! and as the binary's renderer) without a real native dependency.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct PlaceholderRenderer {
        pub fail_load: AtomicBool,
    }

    impl Default for PlaceholderRenderer {
        fn default() -> Self {
            Self {
                fail_load: AtomicBool::new(false),
            }
        }
    }

    impl Renderer for PlaceholderRenderer {
        type Project = String;

        fn load_project(
            &self,
            uri: &str,
            _flags: LoadFlags,
        ) -> Result<Self::Project, qjazz_cache::CacheError> {
            if self.fail_load.load(Ordering::SeqCst) {
                Err(qjazz_cache::CacheError::UnreadableResource(uri.to_string()))
            } else {
                Ok(uri.to_string())
            }
        }

        fn release_project_config(&self, _project: &Self::Project) {}

        fn handle_request(
            &self,
            request: &RendererRequest,
            response: &mut MemoryResponse,
            project: Option<&Self::Project>,
        ) {
            response.set_status(200);
            response.set_header("content-type", "text/plain");
            let body = format!(
                "{} {} project={:?}",
                request.method,
                request.url,
                project.map(|p| p.as_str()).unwrap_or("-")
            );
            response.write_chunk(body.into_bytes());
        }
    }
}
