//! Worker child process supervision (§4.C4), grounded on
//! `py_qgis_rpc/pipes.py`'s `Pipe`/`RendezVous` (the teacher carries no
//! async-subprocess-supervisor equivalent) re-expressed over
//! `tokio::process` and the framed pipe in `qjazz_ipc`.
//!
//! One supervisor owns one child. The pipe is single-request-at-a-time:
//! [`Supervisor::execute`] holds the pipe's lock for the whole
//! request/reply exchange, including every streamed frame, so a second
//! caller simply queues behind the async mutex rather than interleaving
//! frames on the wire.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use qjazz_ipc::frame::{framed_read, framed_write};
use qjazz_ipc::messages::{Envelope, Message, QuitMsg};
use qjazz_ipc::{create_fifo, read_message, write_message, RendezVousReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{info, warn};

use crate::config::WorkerProcessConfig;

/// True for message kinds whose reply is a frame sequence terminated by
/// `Envelope::end_of_stream()`; false for the unary admin ops that reply
/// with exactly one frame and no sentinel (§4.C3 dispatch table).
fn expects_stream(msg: &Message) -> bool {
    matches!(
        msg,
        Message::OwsRequest(_)
            | Message::ApiRequest(_)
            | Message::ListCache(_)
            | Message::UpdateCache(_)
            | Message::Catalog(_)
            | Message::Plugins(_)
    )
}

struct SupervisorState {
    child: Child,
    writer: FramedWrite<ChildStdin, LengthDelimitedCodec>,
    reader: FramedRead<ChildStdout, LengthDelimitedCodec>,
    rendezvous: RendezVousReader,
}

/// One worker child and the pipe used to talk to it.
pub struct Supervisor {
    id: usize,
    pid: u32,
    process: WorkerProcessConfig,
    rendezvous_path: PathBuf,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Spawns the child, wires up its stdio as the framed pipe, and blocks
    /// (up to `start_timeout_secs`) until the worker's first rendezvous
    /// `done` byte confirms it is ready to receive requests.
    pub async fn spawn(id: usize, process: WorkerProcessConfig, rendezvous_dir: &Path) -> Result<Self> {
        let rendezvous_path = rendezvous_dir.join(format!("worker-{id}.rendezvous"));
        create_fifo(&rendezvous_path)
            .map_err(|e| anyhow!("creating rendezvous fifo for worker {id}: {e}"))?;

        let mut command = Command::new(&process.command);
        command
            .args(&process.args)
            .envs(&process.env)
            .env("RENDEZ_VOUS", &rendezvous_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(project_file) = &process.project_file {
            command.env("QGIS_PROJECT_FILE", project_file);
        }
        if let Some(config_file) = &process.config_file {
            command.env("CONF_WORKER", config_file);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning worker {id} (`{}`)", process.command))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("worker {id} exited before its pid could be read"))?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let start_timeout = Duration::from_secs(process.start_timeout_secs);
        let mut rendezvous = tokio::time::timeout(start_timeout, RendezVousReader::open(&rendezvous_path))
            .await
            .map_err(|_| anyhow!("worker {id} did not connect its rendezvous pipe within {start_timeout:?}"))?
            .with_context(|| format!("opening rendezvous pipe for worker {id}"))?;
        tokio::time::timeout(start_timeout, rendezvous.wait_done())
            .await
            .map_err(|_| anyhow!("worker {id} did not signal readiness within {start_timeout:?}"))?
            .with_context(|| format!("waiting for worker {id} readiness"))?;

        info!(worker_id = id, pid, "worker ready");

        Ok(Self {
            id,
            pid,
            process,
            rendezvous_path,
            state: Mutex::new(SupervisorState {
                child,
                writer: framed_write(stdin),
                reader: framed_read(stdout),
                rendezvous,
            }),
        })
    }

    /// Submits `msg` and streams back its reply frames. Holds the pipe
    /// lock until the reply is fully drained (the sentinel for streaming
    /// replies, or the single frame for unary ones), so concurrent callers
    /// on the same supervisor serialize rather than interleave.
    pub fn execute(self: &std::sync::Arc<Self>, msg: Message) -> mpsc::Receiver<Result<Envelope>> {
        let (tx, rx) = mpsc::channel(32);
        let streaming = expects_stream(&msg);
        let sup = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut state = sup.state.lock().await;
            if let Err(e) = write_message(&mut state.writer, &msg).await {
                let _ = tx.send(Err(anyhow!("writing to worker {}: {e}", sup.id))).await;
                return;
            }
            loop {
                match read_message::<_, Envelope>(&mut state.reader).await {
                    Ok(Some(envelope)) => {
                        let is_end = envelope.is_end_of_stream();
                        let done = !streaming || is_end;
                        if tx.send(Ok(envelope)).await.is_err() {
                            break;
                        }
                        if done {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = tx
                            .send(Err(anyhow!("worker {} closed the pipe mid-reply", sup.id)))
                            .await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("reading from worker {}: {e}", sup.id))).await;
                        break;
                    }
                }
            }
            if let Err(e) = state.rendezvous.wait_done().await {
                warn!(worker_id = sup.id, error = %e, "rendezvous readiness wait failed after reply");
            }
        });
        rx
    }

    /// Convenience for unary ops that reply with exactly one frame.
    pub async fn send_unary(self: &std::sync::Arc<Self>, msg: Message) -> Result<Envelope> {
        let mut rx = self.execute(msg);
        rx.recv()
            .await
            .ok_or_else(|| anyhow!("worker {} closed the pipe without replying", self.id))?
    }

    /// Sends `SIGHUP` to interrupt the in-flight request (§4.C4 `cancel`)
    /// and waits up to `cancel_drain_timeout_secs` for the pipe lock to
    /// free up, confirming the worker actually unwound.
    pub async fn cancel(&self) -> Result<()> {
        self.signal(Signal::SIGHUP)?;
        let drain = Duration::from_secs(self.process.cancel_drain_timeout_secs);
        match tokio::time::timeout(drain, self.state.lock()).await {
            Ok(_guard) => Ok(()),
            Err(_) => Err(anyhow!(
                "worker {} did not acknowledge cancellation within {drain:?}",
                self.id
            )),
        }
    }

    /// Asks the worker to exit cleanly, falling back to [`Self::terminate`]
    /// if it does not within `quit_grace_secs` (§4.C4 `quit`).
    pub async fn quit(&self) -> Result<()> {
        let grace = Duration::from_secs(self.process.quit_grace_secs);
        {
            let mut state = self.state.lock().await;
            write_message(&mut state.writer, &Message::Quit(QuitMsg {})).await?;
            let _ = read_message::<_, Envelope>(&mut state.reader).await;
        }
        let exited = {
            let mut state = self.state.lock().await;
            tokio::time::timeout(grace, state.child.wait()).await
        };
        match exited {
            Ok(Ok(status)) => {
                info!(worker_id = self.id, %status, "worker exited after quit");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(worker_id = self.id, "worker did not exit within grace period, terminating");
                self.terminate().await
            }
        }
    }

    /// `SIGTERM`, then `SIGKILL` if the child outlives
    /// `terminate_timeout_secs` (§4.C4 `terminate`).
    pub async fn terminate(&self) -> Result<()> {
        let _ = self.signal(Signal::SIGTERM);
        let timeout = Duration::from_secs(self.process.terminate_timeout_secs);
        let mut state = self.state.lock().await;
        match tokio::time::timeout(timeout, state.child.wait()).await {
            Ok(Ok(_status)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(worker_id = self.id, "worker ignored SIGTERM, killing");
                state.child.start_kill()?;
                state.child.wait().await?;
                Ok(())
            }
        }
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        signal::kill(Pid::from_raw(self.pid as i32), sig)
            .map_err(|e| anyhow!("signaling worker {} ({}): {e}", self.id, sig))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.rendezvous_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_messages_do_not_expect_a_stream_sentinel() {
        assert!(!expects_stream(&Message::Ping(qjazz_ipc::messages::PingMsg { echo: None })));
        assert!(!expects_stream(&Message::Sleep(qjazz_ipc::messages::SleepMsg { delay: 0 })));
    }

    #[test]
    fn ows_api_and_listing_ops_expect_a_stream_sentinel() {
        assert!(expects_stream(&Message::ListCache(qjazz_ipc::messages::ListCacheMsg::default())));
        assert!(expects_stream(&Message::Catalog(qjazz_ipc::messages::CatalogMsg::default())));
    }
}
