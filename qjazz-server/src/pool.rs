//! The named pool of worker supervisors (§4.C5 "pool of N supervisors"),
//! grounded on `cloud-servers-oss/src/config.rs`'s fixed-size worker pool
//! shape and `py_qgis_rpc/worker.py`'s round-trip acquire/release protocol,
//! re-expressed with an explicit FIFO idle queue rather than a round-robin
//! counter, since acquisition order is part of the contract (§4.C5).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ServerConfig;
use crate::supervisor::Supervisor;

struct PoolInner {
    supervisors: Vec<Arc<Supervisor>>,
    /// Indices of idle supervisors, popped in FIFO order by `acquire` and
    /// pushed back by [`SupervisorHandle::drop`].
    idle_tx: mpsc::UnboundedSender<usize>,
}

pub struct SupervisorPool {
    inner: PoolInner,
    idle_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<usize>>,
}

impl SupervisorPool {
    /// Spawns `pool_size` workers under `rendezvous_dir`, in order, and
    /// seeds the idle queue with their indices.
    pub async fn start(config: &ServerConfig, rendezvous_dir: PathBuf) -> Result<Arc<Self>> {
        if config.pool_size == 0 {
            return Err(anyhow!("pool_size must be at least 1"));
        }
        tokio::fs::create_dir_all(&rendezvous_dir).await?;

        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut supervisors = Vec::with_capacity(config.pool_size);
        for id in 0..config.pool_size {
            let supervisor = Supervisor::spawn(id, config.worker.clone(), &rendezvous_dir).await?;
            supervisors.push(Arc::new(supervisor));
            idle_tx
                .send(id)
                .map_err(|_| anyhow!("idle queue closed while starting the pool"))?;
        }
        info!(pool_size = supervisors.len(), "worker pool started");

        Ok(Arc::new(Self {
            inner: PoolInner { supervisors, idle_tx },
            idle_rx: tokio::sync::Mutex::new(idle_rx),
        }))
    }

    pub fn size(&self) -> usize {
        self.inner.supervisors.len()
    }

    /// Waits for the next idle supervisor in FIFO order and hands out a
    /// handle that returns it to the queue on drop.
    pub async fn acquire(self: &Arc<Self>) -> SupervisorHandle {
        let id = {
            let mut rx = self.idle_rx.lock().await;
            rx.recv().await.expect("idle queue sender is held by this same pool")
        };
        SupervisorHandle {
            pool: Arc::clone(self),
            supervisor: Arc::clone(&self.inner.supervisors[id]),
            id,
        }
    }

    /// Sends `terminate()` to every supervisor; used on shutdown.
    pub async fn terminate_all(&self) {
        for supervisor in &self.inner.supervisors {
            if let Err(e) = supervisor.terminate().await {
                tracing::warn!(worker_id = supervisor.id(), error = %e, "failed to terminate worker");
            }
        }
    }
}

/// An acquired supervisor. Dropping it returns the index to the idle
/// queue, so the pool's FIFO order only ever contains supervisors nobody
/// is currently holding.
pub struct SupervisorHandle {
    pool: Arc<SupervisorPool>,
    supervisor: Arc<Supervisor>,
    id: usize,
}

impl std::ops::Deref for SupervisorHandle {
    type Target = Arc<Supervisor>;

    fn deref(&self) -> &Self::Target {
        &self.supervisor
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        let _ = self.pool.inner.idle_tx.send(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pool_size_is_rejected_before_any_spawn() {
        let config = ServerConfig {
            pool_size: 0,
            ..Default::default()
        };
        assert_eq!(config.pool_size, 0);
    }
}
