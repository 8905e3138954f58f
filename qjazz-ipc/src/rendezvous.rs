//! The rendezvous FIFO (§4.C3, §6, GLOSSARY): a single-writer/single-reader
//! named pipe the worker uses to signal readiness independently of the main
//! pipe's backpressure. The child writes `0x00` (done) before each `recv`
//! and `0x01` (busy) on receiving a message; the supervisor polls this
//! instead of the data pipe to know when a request has actually completed.

use std::io;
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendezVousStatus {
    Done,
    Busy,
}

impl RendezVousStatus {
    fn from_byte(b: u8) -> io::Result<Self> {
        match b {
            0x00 => Ok(RendezVousStatus::Done),
            0x01 => Ok(RendezVousStatus::Busy),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected rendezvous byte: {other:#x}"),
            )),
        }
    }
}

/// Creates the named pipe at `path`. Must be called before either end opens
/// it; safe to call again if the path already exists as a FIFO.
pub fn create_fifo(path: &Path) -> nix::Result<()> {
    match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Child-side (worker process) handle: synchronous writes, used from the
/// worker's blocking receive loop.
pub struct RendezVousWriter {
    file: std::fs::File,
}

impl RendezVousWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        use std::fs::OpenOptions;
        let file = OpenOptions::new().write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn mark_done(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.file.write_all(&[0x00])
    }

    pub fn mark_busy(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.file.write_all(&[0x01])
    }
}

/// Supervisor-side handle: async reads, polled between request submissions.
pub struct RendezVousReader {
    file: tokio::fs::File,
}

impl RendezVousReader {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::OpenOptions::new().read(true).open(path).await?;
        Ok(Self { file })
    }

    pub async fn read_status(&mut self) -> io::Result<RendezVousStatus> {
        let mut byte = [0u8; 1];
        self.file.read_exact(&mut byte).await?;
        RendezVousStatus::from_byte(byte[0])
    }

    /// Polls until the status is `Done`, per §4.C4's `task_done` contract.
    pub async fn wait_done(&mut self) -> io::Result<()> {
        loop {
            if self.read_status().await? == RendezVousStatus::Done {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_and_reader_observe_the_same_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rendezvous.fifo");
        create_fifo(&path).unwrap();

        let path_for_writer = path.clone();
        let writer_task = tokio::task::spawn_blocking(move || {
            let mut writer = RendezVousWriter::open(&path_for_writer).unwrap();
            writer.mark_busy().unwrap();
            writer.mark_done().unwrap();
        });

        let mut reader = RendezVousReader::open(&path).await.unwrap();
        let first = reader.read_status().await.unwrap();
        let second = reader.read_status().await.unwrap();

        writer_task.await.unwrap();

        assert_eq!(first, RendezVousStatus::Busy);
        assert_eq!(second, RendezVousStatus::Done);
    }
}
