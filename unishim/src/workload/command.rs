//! Locally spawned workload process.
//!
//! In unikernel mode the shim launches the virtualization monitor itself
//! instead of asking the sandbox to run the container. `WorkloadCommand`
//! owns that subprocess for its whole life.

use super::cmdline::{WorkloadContext, build_argv};
use crate::config::ShimConfig;
use crate::lifecycle::{Container, Status};
use crate::sandbox::ExecData;
use crate::stream::{BoxedReader, BufferPool, IoCopy, TtyIo};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use unishim_shared::constants::exit as exit_const;
use unishim_shared::errors::{ShimError, ShimResult};

pub struct WorkloadCommand {
    container: Arc<Container>,
    argv: Vec<String>,
    /// Dropped right after spawn so the parent keeps no child pipe ends.
    cmd: Option<Command>,
    /// Set by `start`; `wait` consumes the command, so it only ever sees a
    /// spawned child.
    child: Option<Child>,
    streaming: bool,
}

impl WorkloadCommand {
    /// Build the command for the workload described by `data`.
    ///
    /// # Errors
    ///
    /// `ShimError::Precondition` when no argv can be assembled.
    pub fn new(
        data: &ExecData,
        container: Arc<Container>,
        config: &ShimConfig,
    ) -> ShimResult<Self> {
        let ctx = container
            .spec()
            .map(WorkloadContext::from_spec)
            .unwrap_or_default();
        let argv = build_argv(data, &ctx, config)?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ShimError::Precondition("empty workload command line".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);

        debug!(container_id = %container.id(), ?argv, "workload command built");

        Ok(Self {
            container,
            argv,
            cmd: Some(cmd),
            child: None,
            streaming: false,
        })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Whether a stream copy engine owns this process's signals.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_started(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Create the process pipes and, when external stdio is configured,
    /// start streaming between them and the container's endpoints.
    ///
    /// The stdin write end always goes to the container's stdin slot.
    /// Without external stdio, stdout and stderr are discarded.
    pub fn attach_stdio(&mut self, pool: &BufferPool) -> ShimResult<()> {
        let cmd = self
            .cmd
            .as_mut()
            .ok_or_else(|| ShimError::InvalidState("workload already spawned".into()))?;
        let stdio = self.container.stdio().clone();
        let process = self.container.process();

        let (stdin_r, stdin_w) = cloexec_pipe("stdin")?;
        cmd.stdin(Stdio::from(stdin_r));
        process.stdin.set(Box::new(pipe::Sender::from_owned_fd(stdin_w)?));

        if !stdio.is_configured() {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            return Ok(());
        }

        let mut stdout: Option<BoxedReader> = None;
        let mut stderr: Option<BoxedReader> = None;

        match &stdio.stdout {
            Some(_) => {
                let (r, w) = cloexec_pipe("stdout")?;
                if stdio.terminal {
                    cmd.stderr(Stdio::from(w.try_clone()?));
                }
                cmd.stdout(Stdio::from(w));
                stdout = Some(Box::new(pipe::Receiver::from_owned_fd(r)?));
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }

        if !stdio.terminal {
            match &stdio.stderr {
                Some(_) => {
                    let (r, w) = cloexec_pipe("stderr")?;
                    cmd.stderr(Stdio::from(w));
                    stderr = Some(Box::new(pipe::Receiver::from_owned_fd(r)?));
                }
                None => {
                    cmd.stderr(Stdio::null());
                }
            }
        } else if stdio.stdout.is_none() {
            cmd.stderr(Stdio::null());
        }

        let tty = TtyIo::open(&stdio)?;
        let copy = IoCopy::for_process(process, tty, stdout, stderr, pool.clone());
        process.spawn(copy.run());
        self.streaming = true;
        Ok(())
    }

    /// Spawn the subprocess and mark the container Running.
    ///
    /// # Errors
    ///
    /// `ShimError::InvalidState` if the container cannot move to Running,
    /// `ShimError::Spawn` if the program cannot be executed.
    pub fn start(&mut self) -> ShimResult<()> {
        let process = self.container.process();
        let status = process.status();
        if !status.can_transition_to(Status::Running) {
            return Err(ShimError::InvalidState(format!(
                "container {} is {}",
                self.container.id(),
                status
            )));
        }

        let mut cmd = self
            .cmd
            .take()
            .ok_or_else(|| ShimError::InvalidState("workload already spawned".into()))?;
        let child = cmd.spawn().map_err(|e| {
            ShimError::Spawn(format!("failed to spawn '{}': {}", self.argv[0], e))
        })?;
        drop(cmd);

        info!(
            container_id = %self.container.id(),
            pid = ?child.id(),
            "workload started"
        );
        self.child = Some(child);
        process.set_running()?;
        Ok(())
    }

    /// Wait for the subprocess to exit and return its exit code.
    ///
    /// Signal deaths are reported as `128 + signo`. When no stream engine
    /// is attached this also closes the container's `exit_io` and
    /// `stdin_closer`.
    pub async fn wait(mut self) -> ShimResult<i32> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| ShimError::InvalidState("workload was never started".into()))?;
        let result = child.wait().await;

        let process = self.container.process();
        if !self.streaming {
            process.exit_io.close();
            process.stdin_closer.close();
        }
        process.mark_stopped();

        let code = exit_code(result?);
        info!(container_id = %self.container.id(), exit_code = code, "workload exited");
        Ok(code)
    }
}

impl std::fmt::Debug for WorkloadCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadCommand")
            .field("container_id", &self.container.id())
            .field("argv", &self.argv)
            .field("pid", &self.pid())
            .field("streaming", &self.streaming)
            .finish()
    }
}

fn cloexec_pipe(stream: &str) -> ShimResult<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(|e| {
        ShimError::Io(std::io::Error::new(
            std::io::Error::from(e).kind(),
            format!("failed to create {} pipe: {}", stream, e),
        ))
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => exit_const::SIGNAL_OFFSET + signal,
        (None, None) => exit_const::FAILED_START as i32,
    }
}
