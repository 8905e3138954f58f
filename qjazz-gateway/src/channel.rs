//! Client-side gRPC connection to a single backend (§4.C6). Mirrors the
//! teacher's health-check client wiring (`tonic_health::pb::health_client`)
//! but keeps the watch running for the channel's lifetime instead of
//! polling once, so `serving` always reflects the backend's current state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qjazz_api_grpc::rpc::qgis_admin_client::QgisAdminClient;
use qjazz_api_grpc::rpc::qgis_server_client::QgisServerClient;
use qjazz_common::error::CoreError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tonic::transport::{Channel as TonicChannel, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::warn;

use crate::config::BackendConfig;

/// Live clients checked out of a [`Channel`], held only as long as the
/// in-flight request needs them. Dropping it releases the in-use count and,
/// if the channel is closing, may unblock [`Channel::close`].
pub struct Stub {
    pub server: QgisServerClient<TonicChannel>,
    pub admin: QgisAdminClient<TonicChannel>,
    _guard: InUseGuard,
}

struct InUseGuard {
    in_use: Arc<AtomicUsize>,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        let previous = self.in_use.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.closing.load(Ordering::SeqCst) {
            self.close_notify.notify_waiters();
        }
    }
}

pub struct Channel {
    pub name: String,
    pub backend: BackendConfig,
    server_client: QgisServerClient<TonicChannel>,
    admin_client: QgisAdminClient<TonicChannel>,
    serving: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    in_use: Arc<AtomicUsize>,
    close_notify: Arc<Notify>,
    health_task: JoinHandle<()>,
}

impl Channel {
    pub fn connect(name: String, backend: BackendConfig, reconnect_backoff: Duration) -> anyhow::Result<Arc<Self>> {
        let endpoint = Endpoint::from_shared(backend.address.clone())?
            .timeout(Duration::from_secs(backend.timeout_secs));
        let conn = endpoint.connect_lazy();

        let serving = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let in_use = Arc::new(AtomicUsize::new(0));
        let close_notify = Arc::new(Notify::new());

        let health_task = tokio::spawn(watch_health(
            name.clone(),
            conn.clone(),
            serving.clone(),
            reconnect_backoff,
        ));

        Ok(Arc::new(Self {
            server_client: QgisServerClient::new(conn.clone()),
            admin_client: QgisAdminClient::new(conn),
            name,
            backend,
            serving,
            closing,
            in_use,
            close_notify,
            health_task,
        }))
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Checks out live clients, rejecting when the channel is down or
    /// draining (§4.C6 `stub()` context).
    pub fn stub(&self) -> Result<Stub, CoreError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable(format!(
                "backend {} is closing",
                self.name
            )));
        }
        if !self.serving.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable(format!(
                "backend {} is not serving",
                self.name
            )));
        }
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(Stub {
            server: self.server_client.clone(),
            admin: self.admin_client.clone(),
            _guard: InUseGuard {
                in_use: self.in_use.clone(),
                closing: self.closing.clone(),
                close_notify: self.close_notify.clone(),
            },
        })
    }

    /// The subset of `headers` forwarded to this backend (§4.C6, §8 header
    /// forwarding invariant).
    pub fn get_metadata<'a>(
        &self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Vec<(String, String)> {
        qjazz_common::globs::filter_headers(headers, &self.backend.forward_headers)
    }

    /// Marks the channel as draining and waits up to `grace` for in-flight
    /// stubs to release before tearing down the health-watch task. Logged
    /// but not retried if `in_use` never reaches zero (§9 open question:
    /// "the grace-period close of a channel while in_use>0 logs an error
    /// but still closes").
    pub async fn close(&self, grace: Duration) {
        self.closing.store(true, Ordering::SeqCst);
        if self.in_use.load(Ordering::SeqCst) > 0 {
            let waited = tokio::time::timeout(grace, self.close_notify.notified()).await;
            if waited.is_err() {
                warn!(
                    backend = %self.name,
                    in_use = self.in_use.load(Ordering::SeqCst),
                    "closing channel with requests still in flight"
                );
            }
        }
        self.health_task.abort();
    }
}

async fn watch_health(
    name: String,
    conn: TonicChannel,
    serving: Arc<AtomicBool>,
    reconnect_backoff: Duration,
) {
    let mut logged_unavailable = false;
    loop {
        let mut client = HealthClient::new(conn.clone());
        let request = HealthCheckRequest {
            service: String::new(),
        };
        match client.watch(request).await {
            Ok(response) => {
                logged_unavailable = false;
                let mut stream = response.into_inner();
                loop {
                    match stream.message().await {
                        Ok(Some(update)) => {
                            let is_serving = update.status == ServingStatus::Serving as i32;
                            serving.store(is_serving, Ordering::SeqCst);
                        }
                        Ok(None) => break,
                        Err(status) => {
                            warn!(backend = %name, %status, "health watch stream ended");
                            break;
                        }
                    }
                }
            }
            Err(status) => {
                if !logged_unavailable {
                    warn!(backend = %name, %status, "backend unavailable, retaining last known serving state");
                    logged_unavailable = true;
                }
            }
        }
        tokio::time::sleep(reconnect_backoff).await;
    }
}
