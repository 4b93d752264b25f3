//! Stream copy engine.
//!
//! One task per configured direction, each with a pooled buffer. The
//! engine is the only place that closes `exit_io` for processes that have
//! streaming attached, and it does so after every direction has finished
//! and every external endpoint has been closed.

use super::tty::TtyIo;
use super::{BoxedReader, BoxedWriter, BufferPool, StdinSlot};
use crate::lifecycle::{Latch, ProcessRecord};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{Instrument, debug};

/// Everything a stream copy run needs.
pub struct IoCopy {
    /// External endpoints.
    pub tty: TtyIo,
    /// Process stdin writer, borrowed by the stdin direction.
    pub stdin: StdinSlot,
    /// Process stdout reader.
    pub stdout: Option<BoxedReader>,
    /// Process stderr reader.
    pub stderr: Option<BoxedReader>,
    pub exit_io: Arc<Latch>,
    pub stdin_closer: Arc<Latch>,
    pub pool: BufferPool,
}

impl IoCopy {
    /// Wire a process's signals and stdin slot to the given endpoints.
    pub fn for_process(
        process: &ProcessRecord,
        tty: TtyIo,
        stdout: Option<BoxedReader>,
        stderr: Option<BoxedReader>,
        pool: BufferPool,
    ) -> Self {
        Self {
            tty,
            stdin: process.stdin.clone(),
            stdout,
            stderr,
            exit_io: process.exit_io.clone(),
            stdin_closer: process.stdin_closer.clone(),
            pool,
        }
    }

    /// Run every configured direction to completion, close the external
    /// endpoints, then close `exit_io`.
    pub async fn run(self) {
        let IoCopy {
            tty,
            stdin,
            stdout,
            stderr,
            exit_io,
            stdin_closer,
            pool,
        } = self;

        debug!(?tty, "io copy started");

        // Closed by the stdout direction to stop a stdin copy that would
        // otherwise wait forever for more input.
        let stdin_abort = Arc::new(Latch::new("stdin_abort"));
        let mut tasks: JoinSet<Option<BoxedWriter>> = JoinSet::new();
        let mut idle_endpoints: Vec<BoxedWriter> = Vec::new();

        let stdin_active = tty.stdin.is_some();
        match tty.stdin {
            Some(reader) => {
                let abort = stdin_abort.clone();
                let pool = pool.clone();
                tasks.spawn(
                    async move {
                        copy_stdin(reader, stdin, &abort, &pool).await;
                        stdin_closer.close();
                        None
                    }
                    .in_current_span(),
                );
            }
            None => {
                stdin_closer.close();
            }
        }

        match (tty.stdout, stdout) {
            (Some(writer), Some(reader)) => {
                let abort = stdin_abort.clone();
                let pool = pool.clone();
                tasks.spawn(
                    async move {
                        let writer = copy_out("stdout", reader, writer, &pool).await;
                        if stdin_active {
                            abort.close();
                        }
                        Some(writer)
                    }
                    .in_current_span(),
                );
            }
            (Some(writer), None) => idle_endpoints.push(writer),
            (None, _) => {}
        }

        match (tty.stderr, stderr) {
            (Some(writer), Some(reader)) => {
                let pool = pool.clone();
                tasks.spawn(
                    async move { Some(copy_out("stderr", reader, writer, &pool).await) }
                        .in_current_span(),
                );
            }
            (Some(writer), None) => idle_endpoints.push(writer),
            (None, _) => {}
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(writer)) => idle_endpoints.push(writer),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "io copy task failed"),
            }
        }

        for mut writer in idle_endpoints {
            let _ = writer.shutdown().await;
        }

        exit_io.close();
        debug!("all io stream copy tasks exited");
    }
}

/// External stdin → process stdin.
async fn copy_stdin(mut reader: BoxedReader, slot: StdinSlot, abort: &Latch, pool: &BufferPool) {
    debug!("stdin io stream copy started");

    let Some(mut writer) = slot.take() else {
        debug!("process stdin already released, skipping stdin copy");
        return;
    };

    let mut buf = pool.get();
    let mut copied = 0u64;
    let result: io::Result<()> = async {
        loop {
            let n = tokio::select! {
                biased;
                _ = abort.wait() => break,
                n = reader.read(&mut buf[..]) => n?,
            };
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            copied += n as u64;
        }
        writer.flush().await
    }
    .await;

    // Dropping the reader closes the external stdin endpoint.
    drop(reader);
    slot.set(writer);

    match result {
        Ok(()) => debug!(bytes = copied, "stdin io stream copy exited"),
        Err(e) => debug!(bytes = copied, error = %e, "stdin io stream copy ended early"),
    }
}

/// Process stdout/stderr → external endpoint. Returns the endpoint so the
/// engine can close it after the barrier.
async fn copy_out(
    stream: &'static str,
    mut reader: BoxedReader,
    mut writer: BoxedWriter,
    pool: &BufferPool,
) -> BoxedWriter {
    debug!(stream, "io stream copy started");

    let mut buf = pool.get();
    match copy_buffered(&mut reader, &mut writer, &mut buf).await {
        Ok(bytes) => debug!(stream, bytes, "io stream copy exited"),
        Err(e) => debug!(stream, error = %e, "io stream copy ended early"),
    }
    writer
}

async fn copy_buffered(
    reader: &mut BoxedReader,
    writer: &mut BoxedWriter,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut total = 0u64;
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}
