//! Worker process entry point (§6 "EXTERNAL INTERFACES", §4.C3): a
//! single-threaded, blocking request/reply loop over stdin/stdout, with a
//! rendezvous FIFO used to signal per-message completion to the supervisor.

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use qjazz_cache::{CheckoutSubject, ResourceUri};
use qjazz_common::config::ConfigLoader;
use qjazz_common::tracing_init::init_tracing_with_default_env_filter;
use qjazz_ipc::{read_message_sync, write_message_sync, Envelope, RendezVousWriter};
use qjazz_worker::{Cancellation, DispatchOutcome, PlaceholderRenderer, WorkerConfig, WorkerState};

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing_with_default_env_filter(&config.tracing);

    let cancellation = Cancellation::install()?;
    let cache_id = env::var("HOSTNAME").unwrap_or_else(|_| format!("worker-{}", std::process::id()));

    let mut rendezvous = env::var("RENDEZ_VOUS")
        .ok()
        .filter(|p| !p.is_empty())
        .map(|path| RendezVousWriter::open(&PathBuf::from(path)))
        .transpose()?;

    let renderer = Arc::new(PlaceholderRenderer::default());
    let mut state = WorkerState::new(config, renderer, cancellation, cache_id);

    if let Ok(project_file) = env::var("QGIS_PROJECT_FILE") {
        if !project_file.is_empty() {
            preload_project(&mut state, &project_file);
        }
    }

    tracing::info!("worker ready, entering receive loop");
    run_loop(&mut state, &mut rendezvous)
}

fn load_config() -> anyhow::Result<WorkerConfig> {
    let loader: ConfigLoader<WorkerConfig> = ConfigLoader::new("/etc/qjazz/worker.toml");
    let path = env::var("CONF_WORKER").ok().map(PathBuf::from);
    Ok(loader.load_from(path.as_deref())?)
}

/// Checks out and loads `QGIS_PROJECT_FILE` at startup, pinning it so it
/// survives eviction (§4.C3 worker launch contract). Failures are logged,
/// not fatal: the worker still serves other projects on demand.
fn preload_project(state: &mut WorkerState<PlaceholderRenderer>, uri: &str) {
    let url = ResourceUri::parse(uri);
    match state.cache.checkout(&url) {
        Ok((Some(CheckoutSubject::Metadata(md)), status)) => {
            match state.cache.update(md, status, true) {
                Ok(_) => tracing::info!(uri, "preloaded project"),
                Err(err) => tracing::warn!(error = %err, uri, "failed to preload project"),
            }
        }
        Ok((_, status)) => tracing::warn!(uri, ?status, "project already resident or removed at startup"),
        Err(err) => tracing::warn!(error = %err, uri, "checkout failed while preloading project"),
    }
}

fn run_loop(
    state: &mut WorkerState<PlaceholderRenderer>,
    rendezvous: &mut Option<RendezVousWriter>,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    loop {
        if let Some(writer) = rendezvous.as_mut() {
            writer.mark_done()?;
        }

        let message = match read_message_sync(&mut input)? {
            Some(message) => message,
            None => {
                tracing::info!("pipe closed by supervisor, exiting");
                return Ok(());
            }
        };

        if let Some(writer) = rendezvous.as_mut() {
            writer.mark_busy()?;
        }

        match state.dispatch(message) {
            DispatchOutcome::Continue(frames) => write_frames(&mut output, frames)?,
            DispatchOutcome::Quit(frames) => {
                write_frames(&mut output, frames)?;
                tracing::info!("quit message received, exiting");
                return Ok(());
            }
        }
    }
}

fn write_frames<W: io::Write>(output: &mut W, frames: Vec<Envelope>) -> anyhow::Result<()> {
    for frame in frames {
        write_message_sync(output, &frame)?;
    }
    Ok(())
}
