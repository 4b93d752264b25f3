//! External stdio endpoints.
//!
//! The container manager hands the shim FIFO paths; `TtyIo` holds them open
//! while the process runs.

use super::{BoxedReader, BoxedWriter};
use crate::lifecycle::StdioConfig;
use std::path::Path;
use tokio::net::unix::pipe;
use unishim_shared::errors::{ShimError, ShimResult};

/// Open external endpoints: stdin is read by the shim, stdout and stderr
/// are written by it.
#[derive(Default)]
pub struct TtyIo {
    pub stdin: Option<BoxedReader>,
    pub stdout: Option<BoxedWriter>,
    pub stderr: Option<BoxedWriter>,
}

impl TtyIo {
    /// Open the configured FIFOs.
    ///
    /// stdin is opened read-only and non-blocking; stdout and stderr are
    /// opened read-write so the open never waits for a reader. In terminal
    /// mode stderr is not opened.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(stdio: &StdioConfig) -> ShimResult<Self> {
        let stdin = match &stdio.stdin {
            Some(path) => Some(Box::new(open_reader(path)?) as BoxedReader),
            None => None,
        };

        let stdout = match &stdio.stdout {
            Some(path) => Some(Box::new(open_writer(path)?) as BoxedWriter),
            None => None,
        };

        let stderr = match (&stdio.stderr, stdio.terminal) {
            (Some(path), false) => Some(Box::new(open_writer(path)?) as BoxedWriter),
            _ => None,
        };

        Ok(Self {
            stdin,
            stdout,
            stderr,
        })
    }

    /// Build from already open endpoints.
    pub fn from_parts(
        stdin: Option<BoxedReader>,
        stdout: Option<BoxedWriter>,
        stderr: Option<BoxedWriter>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}

impl std::fmt::Debug for TtyIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

fn open_reader(path: &Path) -> ShimResult<pipe::Receiver> {
    pipe::OpenOptions::new()
        .open_receiver(path)
        .map_err(|e| open_error(path, e))
}

fn open_writer(path: &Path) -> ShimResult<pipe::Sender> {
    pipe::OpenOptions::new()
        .read_write(true)
        .open_sender(path)
        .map_err(|e| open_error(path, e))
}

fn open_error(path: &Path, e: std::io::Error) -> ShimError {
    ShimError::Io(std::io::Error::new(
        e.kind(),
        format!("failed to open fifo {}: {}", path.display(), e),
    ))
}
