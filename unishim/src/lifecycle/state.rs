//! Process status and the per-entity lifecycle record.

use super::signal::{ExitSignal, Latch};
use crate::stream::StdinSlot;
use crate::util::task::TaskSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;
use unishim_shared::errors::{ShimError, ShimResult};

/// Lifecycle status of a container or exec process.
///
/// ```text
/// new()            → Created
/// start succeeds   → Running
/// process reaped   → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Stopped,
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Status::Stopped)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: Status) -> bool {
        use Status::*;
        matches!(
            (self, target),
            (Created, Running) | (Created, Stopped) | (Running, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a process, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub status: Status,
    pub exit_code: Option<u32>,
}

/// State shared by containers and execs: status, the three one-shot
/// signals, stdin ownership and the supervised tasks.
#[derive(Debug)]
pub struct ProcessRecord {
    status: Mutex<Status>,
    exit_code: Mutex<Option<u32>>,

    /// Terminal outcome; fired once with the exit code or the start
    /// failure sentinel.
    pub exit: ExitSignal,

    /// Closed once every stream copy for this process has finished.
    pub exit_io: Arc<Latch>,

    /// Closed once it is safe to release the process stdin.
    pub stdin_closer: Arc<Latch>,

    pub(crate) stdin: StdinSlot,
    pub(crate) tasks: TaskSet,
    span: tracing::Span,
}

impl ProcessRecord {
    pub(crate) fn new(span: tracing::Span) -> Self {
        Self {
            status: Mutex::new(Status::Created),
            exit_code: Mutex::new(None),
            exit: ExitSignal::new(),
            exit_io: Arc::new(Latch::new("exit_io")),
            stdin_closer: Arc::new(Latch::new("stdin_closer")),
            stdin: StdinSlot::default(),
            tasks: TaskSet::new("process"),
            span,
        }
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock()
    }

    pub fn state(&self) -> ProcessState {
        ProcessState {
            status: self.status(),
            exit_code: self.exit_code(),
        }
    }

    /// Created → Running.
    pub(crate) fn set_running(&self) -> ShimResult<()> {
        let mut status = self.status.lock();
        if !status.can_transition_to(Status::Running) {
            return Err(ShimError::InvalidState(format!(
                "cannot move process from {} to running",
                *status
            )));
        }
        *status = Status::Running;
        Ok(())
    }

    /// Running → Created, for a start that failed after the Running flip.
    /// Returns false if the process was not Running.
    pub(crate) fn revert_running(&self) -> bool {
        let mut status = self.status.lock();
        if !status.is_running() {
            return false;
        }
        *status = Status::Created;
        true
    }

    /// Move to Stopped. Returns false if the process was already stopped.
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut status = self.status.lock();
        if status.is_stopped() {
            return false;
        }
        *status = Status::Stopped;
        true
    }

    pub(crate) fn record_exit_code(&self, code: u32) {
        *self.exit_code.lock() = Some(code);
    }

    /// Spawn a supervised task inside this process's span.
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task.instrument(self.span.clone()));
    }

    /// No process stdin writer is held, as after `close_io`.
    pub fn stdin_released(&self) -> bool {
        !self.stdin.is_set()
    }

    /// Either I/O signal was closed twice.
    pub fn io_signals_reclosed(&self) -> bool {
        self.exit_io.closed_more_than_once() || self.stdin_closer.closed_more_than_once()
    }

    /// Number of supervised tasks started for this process.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn join_tasks(&self) {
        self.tasks.join().await;
    }

    pub fn abort_tasks(&self) {
        self.tasks.abort();
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
