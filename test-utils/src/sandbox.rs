use async_trait::async_trait;
use oci_spec::runtime::Process;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{mpsc, watch};
use unishim::{ExecData, ProcessHandle, ProcessStdio, Sandbox};
use unishim_shared::errors::{ShimError, ShimResult};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A recorded sandbox call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCall {
    Start,
    StartContainer(String),
    EnterContainer(String),
    IoStream {
        container_id: String,
        process_id: String,
    },
    WinsizeProcess {
        container_id: String,
        process_id: String,
        height: u32,
        width: u32,
    },
    WaitProcess {
        container_id: String,
        process_id: String,
    },
    Monitor,
}

/// Operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOp {
    Start,
    StartContainer,
    EnterContainer,
    IoStream,
    WinsizeProcess,
    Monitor,
}

/// Test-side ends of the pipes handed out by `io_stream`.
#[derive(Debug)]
pub struct ProcessPeers {
    /// Reads what the shim writes to the process stdin.
    pub stdin: DuplexStream,
    /// Writes process stdout; drop for EOF.
    pub stdout: DuplexStream,
    /// Writes process stderr; drop for EOF.
    pub stderr: DuplexStream,
}

/// In-memory sandbox driven by the test.
pub struct MockSandbox {
    id: String,
    exec_data: Mutex<ExecData>,
    net_ns: Option<PathBuf>,
    calls: Mutex<Vec<SandboxCall>>,
    failures: Mutex<HashSet<SandboxOp>>,
    peers: Mutex<HashMap<String, ProcessPeers>>,
    exits: Mutex<HashMap<String, watch::Sender<Option<i32>>>>,
    monitor_tx: Mutex<Option<mpsc::Sender<ShimError>>>,
    oom_tx: Mutex<Option<mpsc::UnboundedSender<ShimResult<String>>>>,
    oom_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ShimResult<String>>>,
    next_token: Mutex<u32>,
}

impl MockSandbox {
    pub fn new(id: impl Into<String>) -> Self {
        let (oom_tx, oom_rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            exec_data: Mutex::new(ExecData::default()),
            net_ns: None,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            peers: Mutex::new(HashMap::new()),
            exits: Mutex::new(HashMap::new()),
            monitor_tx: Mutex::new(None),
            oom_tx: Mutex::new(Some(oom_tx)),
            oom_rx: tokio::sync::Mutex::new(oom_rx),
            next_token: Mutex::new(0),
        }
    }

    pub fn with_exec_data(self, data: ExecData) -> Self {
        *self.exec_data.lock() = data;
        self
    }

    pub fn with_net_ns(mut self, net_ns: impl Into<PathBuf>) -> Self {
        self.net_ns = Some(net_ns.into());
        self
    }

    /// Make every later call of `op` fail with `ShimError::Sandbox`.
    pub fn fail_on(&self, op: SandboxOp) {
        self.failures.lock().insert(op);
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().clone()
    }

    /// Test-side pipe ends of the process, once `io_stream` was called.
    pub fn take_peers(&self, process_id: &str) -> Option<ProcessPeers> {
        self.peers.lock().remove(process_id)
    }

    /// Let `wait_process` for `process_id` return `code`.
    pub fn exit_process(&self, process_id: &str, code: i32) {
        // Kept even when nobody waits yet.
        self.exit_sender(process_id).send_replace(Some(code));
    }

    /// Report a fault on the monitor channel, if one was requested.
    pub fn report_fault(&self, fault: ShimError) -> bool {
        match self.monitor_tx.lock().as_ref() {
            Some(tx) => tx.try_send(fault).is_ok(),
            None => false,
        }
    }

    pub fn send_oom(&self, event: ShimResult<String>) {
        if let Some(tx) = self.oom_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// After queued events, `oom_event` reports `Unavailable`.
    pub fn close_oom(&self) {
        self.oom_tx.lock().take();
    }

    fn record(&self, call: SandboxCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, op: SandboxOp) -> ShimResult<()> {
        if self.failures.lock().contains(&op) {
            return Err(ShimError::Sandbox(format!("{:?} failed", op)));
        }
        Ok(())
    }

    fn exit_sender(&self, process_id: &str) -> watch::Sender<Option<i32>> {
        self.exits
            .lock()
            .entry(process_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> ShimResult<()> {
        self.record(SandboxCall::Start);
        self.check(SandboxOp::Start)
    }

    async fn start_container(&self, container_id: &str) -> ShimResult<()> {
        self.record(SandboxCall::StartContainer(container_id.to_string()));
        self.check(SandboxOp::StartContainer)
    }

    async fn enter_container(
        &self,
        container_id: &str,
        _cmd: &Process,
    ) -> ShimResult<ProcessHandle> {
        self.record(SandboxCall::EnterContainer(container_id.to_string()));
        self.check(SandboxOp::EnterContainer)?;
        let mut next = self.next_token.lock();
        *next += 1;
        Ok(ProcessHandle {
            token: format!("proc-{}", *next),
        })
    }

    async fn io_stream(&self, container_id: &str, process_id: &str) -> ShimResult<ProcessStdio> {
        self.record(SandboxCall::IoStream {
            container_id: container_id.to_string(),
            process_id: process_id.to_string(),
        });
        self.check(SandboxOp::IoStream)?;

        let (stdin_shim, stdin_peer) = duplex(PIPE_CAPACITY);
        let (stdout_shim, stdout_peer) = duplex(PIPE_CAPACITY);
        let (stderr_shim, stderr_peer) = duplex(PIPE_CAPACITY);
        self.peers.lock().insert(
            process_id.to_string(),
            ProcessPeers {
                stdin: stdin_peer,
                stdout: stdout_peer,
                stderr: stderr_peer,
            },
        );
        Ok(ProcessStdio::new(
            Some(Box::new(stdin_shim)),
            Some(Box::new(stdout_shim)),
            Some(Box::new(stderr_shim)),
        ))
    }

    async fn winsize_process(
        &self,
        container_id: &str,
        process_id: &str,
        height: u32,
        width: u32,
    ) -> ShimResult<()> {
        self.record(SandboxCall::WinsizeProcess {
            container_id: container_id.to_string(),
            process_id: process_id.to_string(),
            height,
            width,
        });
        self.check(SandboxOp::WinsizeProcess)
    }

    async fn wait_process(&self, container_id: &str, process_id: &str) -> ShimResult<i32> {
        self.record(SandboxCall::WaitProcess {
            container_id: container_id.to_string(),
            process_id: process_id.to_string(),
        });
        let mut rx = self.exit_sender(process_id).subscribe();
        let code = rx
            .wait_for(|code| code.is_some())
            .await
            .map_err(|_| ShimError::Sandbox("process exit channel closed".into()))?;
        Ok((*code).unwrap_or_default())
    }

    async fn monitor(&self) -> ShimResult<mpsc::Receiver<ShimError>> {
        self.record(SandboxCall::Monitor);
        self.check(SandboxOp::Monitor)?;
        let (tx, rx) = mpsc::channel(1);
        *self.monitor_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn oom_event(&self) -> ShimResult<String> {
        match self.oom_rx.lock().await.recv().await {
            Some(event) => event,
            None => Err(ShimError::Unavailable("oom events closed".into())),
        }
    }

    fn net_ns(&self) -> Option<PathBuf> {
        self.net_ns.clone()
    }

    fn exec_data(&self) -> ExecData {
        self.exec_data.lock().clone()
    }
}
