//! I/O streaming between a process's stdio and external endpoints.
//!
//! - **pool.rs**: fixed-size copy buffers shared across copy tasks
//! - **tty.rs**: external endpoints (FIFOs from the container manager)
//! - **copy.rs**: the per-direction copy tasks and the shutdown barrier

mod copy;
mod pool;
mod tty;

pub use copy::IoCopy;
pub use pool::{BufferPool, PooledBuf};
pub use tty::TtyIo;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Readable half of a stream (process stdout/stderr, external stdin).
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a stream (process stdin, external stdout/stderr).
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-side stdio handles, as returned by the sandbox or by a local
/// subprocess.
#[derive(Default)]
pub struct ProcessStdio {
    pub stdin: Option<BoxedWriter>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
}

impl ProcessStdio {
    pub fn new(
        stdin: Option<BoxedWriter>,
        stdout: Option<BoxedReader>,
        stderr: Option<BoxedReader>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }
}

impl std::fmt::Debug for ProcessStdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStdio")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Exclusive owner of the write side of a process's stdin.
///
/// The stdin copy task takes the writer for the duration of the copy and
/// hands it back; `close_io` takes it for good and drops it.
#[derive(Clone, Default)]
pub struct StdinSlot {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl StdinSlot {
    pub fn set(&self, writer: BoxedWriter) {
        *self.inner.lock() = Some(writer);
    }

    pub fn take(&self) -> Option<BoxedWriter> {
        self.inner.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl std::fmt::Debug for StdinSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
