//! Integration tests for starting container init processes through the
//! sandbox.

use oci_spec::runtime::SpecBuilder;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use unishim::{
    Container, ContainerType, ShimConfig, ShimError, ShimEvent, ShimService, Status, StdioConfig,
};
use unishim_shared::constants::exit::FAILED_START;
use unishim_test_utils::{MockSandbox, RecordingHooks, SandboxCall, SandboxOp, fifo_stdio};

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    service: ShimService,
    sandbox: Arc<MockSandbox>,
    hooks: Arc<RecordingHooks>,
    dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_hooks(RecordingHooks::new())
    }

    fn with_hooks(hooks: RecordingHooks) -> Self {
        let hooks = Arc::new(hooks);
        let sandbox = Arc::new(MockSandbox::new("sb-1").with_net_ns("/var/run/netns/cni-1"));
        let service = ShimService::new(ShimConfig::default(), hooks.clone());
        service.set_sandbox(sandbox.clone());
        Self {
            service,
            sandbox,
            hooks,
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn add(&self, kind: Option<ContainerType>, stdio: StdioConfig) -> Arc<Container> {
        let container = Container::new("c1", kind, self.dir.path()).with_stdio(stdio);
        self.service.add_container(container).unwrap()
    }
}

async fn within<F: std::future::Future>(what: &str, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ============================================================================
// STREAMING
// ============================================================================

#[tokio::test]
async fn plain_container_with_stdio_streams_until_every_direction_ends() {
    let ctx = TestContext::new();
    let stdio = fifo_stdio(ctx.dir.path(), false);
    let container = ctx.add(Some(ContainerType::PlainContainer), stdio);

    ctx.service.start("c1", None).await.unwrap();
    let process = container.process();
    assert_eq!(process.status(), Status::Running);
    assert_eq!(
        ctx.sandbox.calls(),
        vec![
            SandboxCall::StartContainer("c1".into()),
            SandboxCall::IoStream {
                container_id: "c1".into(),
                process_id: "c1".into(),
            },
        ]
    );

    let peers = ctx.sandbox.take_peers("c1").expect("io_stream was called");

    // Only stdout ends: stderr is still streaming.
    drop(peers.stdout);
    settle().await;
    assert!(!process.exit_io.is_closed());

    drop(peers.stderr);
    within("exit_io", process.exit_io.wait()).await;
    assert!(process.stdin_closer.is_closed());

    ctx.sandbox.exit_process("c1", 0);
    assert_eq!(within("exit", ctx.service.wait("c1", None)).await.unwrap(), 0);
    assert_eq!(process.status(), Status::Stopped);
    assert_eq!(process.exit_code(), Some(0));
    assert!(!process.io_signals_reclosed());
}

#[tokio::test]
async fn plain_container_without_stdio_closes_signals_immediately() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());

    ctx.service.start_container(&container).await.unwrap();

    let process = container.process();
    assert_eq!(process.status(), Status::Running);
    assert!(process.exit_io.is_closed());
    assert!(process.stdin_closer.is_closed());
    assert_eq!(process.task_count(), 1, "only the reconciliation task runs");

    ctx.sandbox.exit_process("c1", 0);
    within("wait", ctx.service.wait("c1", None)).await.unwrap();
    within("tasks", container.join_tasks()).await;
    assert!(!process.io_signals_reclosed());
}

#[tokio::test]
async fn exit_reported_before_reconciliation_subscribes_is_kept() {
    let ctx = TestContext::new();
    ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());

    ctx.sandbox.exit_process("c1", 42);
    ctx.service.start("c1", None).await.unwrap();

    assert_eq!(
        within("wait", ctx.service.wait("c1", None)).await.unwrap(),
        42
    );
}

#[tokio::test]
async fn exit_code_published_after_io_drained() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());
    let mut events = ctx.service.subscribe_events();

    ctx.service.start("c1", None).await.unwrap();
    ctx.sandbox.exit_process("c1", 7);

    assert_eq!(
        within("wait", ctx.service.wait("c1", None)).await.unwrap(),
        7
    );
    assert_eq!(
        within("exit event", events.recv()).await.unwrap(),
        ShimEvent::Exit {
            container_id: "c1".into(),
            exec_id: None,
            exit_code: 7,
        }
    );
    within("tasks", container.join_tasks()).await;
    assert_eq!(container.process().state().exit_code, Some(7));
}

#[tokio::test]
async fn close_io_releases_process_stdin_after_stdin_stream() {
    let ctx = TestContext::new();
    let stdio = fifo_stdio(ctx.dir.path(), false);
    let stdin_path = stdio.stdin.clone().unwrap();
    let container = ctx.add(Some(ContainerType::PlainContainer), stdio);

    // Held read-write so the shim's stdin read does not see EOF early.
    let mut feeder = tokio::net::unix::pipe::OpenOptions::new()
        .read_write(true)
        .open_sender(&stdin_path)
        .unwrap();

    ctx.service.start("c1", None).await.unwrap();
    let mut peers = ctx.sandbox.take_peers("c1").unwrap();

    feeder.write_all(b"ping").await.unwrap();
    let mut got = [0u8; 4];
    tokio::io::AsyncReadExt::read_exact(&mut peers.stdin, &mut got)
        .await
        .unwrap();
    assert_eq!(&got, b"ping");

    drop(feeder);
    within("close_io", ctx.service.close_io("c1", None)).await.unwrap();

    // The process sees EOF on stdin once the shim released it.
    let mut rest = Vec::new();
    within(
        "stdin EOF",
        tokio::io::AsyncReadExt::read_to_end(&mut peers.stdin, &mut rest),
    )
    .await
    .unwrap();
    assert!(rest.is_empty());
    assert!(container.process().stdin_released());
}

// ============================================================================
// FAILURE CONTRACT
// ============================================================================

#[tokio::test]
async fn missing_type_delivers_sentinel_once() {
    let ctx = TestContext::new();
    let container = ctx.add(None, StdioConfig::default());

    let err = ctx.service.start("c1", None).await.unwrap_err();
    assert!(matches!(err, ShimError::Precondition(_)));

    let process = container.process();
    assert_eq!(process.exit.code(), Some(FAILED_START));
    assert!(process.exit.fire(0).is_err(), "exit already fired");
    assert_eq!(process.exit.code(), Some(FAILED_START));
    assert_eq!(process.status(), Status::Created);
    assert!(ctx.sandbox.calls().is_empty());
    assert_eq!(
        within("wait", ctx.service.wait("c1", None)).await.unwrap(),
        FAILED_START
    );
}

#[tokio::test]
async fn missing_sandbox_is_a_precondition_fault() {
    let service = ShimService::new(ShimConfig::default(), Arc::new(RecordingHooks::new()));
    let container = service
        .add_container(Container::new(
            "c1",
            Some(ContainerType::PlainContainer),
            "/b",
        ))
        .unwrap();

    let err = service.start("c1", None).await.unwrap_err();
    assert!(matches!(err, ShimError::Precondition(_)));
    assert_eq!(container.process().exit.code(), Some(FAILED_START));
}

#[tokio::test]
async fn sandbox_start_failure_propagates_with_sentinel() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());
    ctx.sandbox.fail_on(SandboxOp::StartContainer);

    let err = ctx.service.start("c1", None).await.unwrap_err();
    assert!(matches!(err, ShimError::Sandbox(_)));
    assert_eq!(container.process().exit.code(), Some(FAILED_START));
    assert_eq!(container.process().status(), Status::Created);
    assert_eq!(container.process().task_count(), 0);
}

#[tokio::test]
async fn io_stream_failure_delivers_sentinel() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());
    ctx.sandbox.fail_on(SandboxOp::IoStream);

    assert!(ctx.service.start("c1", None).await.is_err());
    assert_eq!(container.process().exit.code(), Some(FAILED_START));
    assert_eq!(container.process().task_count(), 0);
    assert_eq!(container.process().status(), Status::Created);
    assert_eq!(
        ctx.service.state("c1", None).unwrap().status,
        Status::Created
    );
}

#[tokio::test]
async fn endpoint_open_failure_leaves_container_created() {
    let ctx = TestContext::new();
    let stdio = StdioConfig {
        stdout: Some(ctx.dir.path().join("missing").join("stdout")),
        ..Default::default()
    };
    let container = ctx.add(Some(ContainerType::PlainContainer), stdio);

    assert!(ctx.service.start("c1", None).await.is_err());
    assert_eq!(container.process().exit.code(), Some(FAILED_START));
    assert_eq!(container.process().status(), Status::Created);
    assert_eq!(
        within("wait", ctx.service.wait("c1", None)).await.unwrap(),
        FAILED_START
    );
}

#[tokio::test]
async fn second_start_is_rejected_without_sentinel() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());

    ctx.service.start("c1", None).await.unwrap();
    let err = ctx.service.start("c1", None).await.unwrap_err();
    assert!(matches!(err, ShimError::InvalidState(_)));
    assert_eq!(container.process().exit.code(), None);
}

// ============================================================================
// HOOKS
// ============================================================================

#[tokio::test]
async fn hook_failure_does_not_fail_start() {
    let ctx = TestContext::with_hooks(RecordingHooks::failing("hook exploded"));
    let spec = SpecBuilder::default().build().unwrap();
    let container = ctx
        .service
        .add_container(
            Container::new("c1", Some(ContainerType::PlainContainer), "/run/bundle").with_spec(spec),
        )
        .unwrap();

    ctx.service.start("c1", None).await.unwrap();
    assert_eq!(container.process().status(), Status::Running);

    let invocations = ctx.hooks.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].sandbox_id, "sb-1");
    assert_eq!(
        invocations[0].net_ns.as_deref(),
        Some(std::path::Path::new("/var/run/netns/cni-1"))
    );
    assert_eq!(invocations[0].bundle, std::path::Path::new("/run/bundle"));
}

#[tokio::test]
async fn hooks_skipped_without_spec() {
    let ctx = TestContext::new();
    ctx.add(Some(ContainerType::PlainContainer), StdioConfig::default());
    ctx.service.start("c1", None).await.unwrap();
    assert!(ctx.hooks.invocations().is_empty());
}

// ============================================================================
// SANDBOX ROOT
// ============================================================================

#[tokio::test]
async fn sandbox_root_starts_sandbox_and_watchers() {
    let ctx = TestContext::new();
    ctx.add(Some(ContainerType::SandboxRoot), StdioConfig::default());
    let mut events = ctx.service.subscribe_events();

    ctx.service.start("c1", None).await.unwrap();
    assert_eq!(
        &ctx.sandbox.calls()[..2],
        &[SandboxCall::Start, SandboxCall::Monitor]
    );

    ctx.sandbox.send_oom(Ok("c1".into()));
    assert_eq!(
        within("oom event", events.recv()).await.unwrap(),
        ShimEvent::Oom {
            container_id: "c1".into()
        }
    );

    assert!(ctx.sandbox.report_fault(ShimError::Sandbox("vm died".into())));
    match within("fault event", events.recv()).await.unwrap() {
        ShimEvent::SandboxFault { error } => assert!(error.contains("vm died")),
        other => panic!("unexpected event {:?}", other),
    }

    ctx.service.shutdown();
}

#[tokio::test]
async fn oom_watcher_retries_transient_errors_and_stops_when_unavailable() {
    let config = ShimConfig {
        oom_retry_delay_ms: 10,
        ..Default::default()
    };
    let sandbox = Arc::new(MockSandbox::new("sb-1"));
    let service = ShimService::new(config, Arc::new(RecordingHooks::new()));
    service.set_sandbox(sandbox.clone());
    service
        .add_container(Container::new("c1", Some(ContainerType::SandboxRoot), "/b"))
        .unwrap();
    let mut events = service.subscribe_events();

    service.start("c1", None).await.unwrap();
    sandbox.send_oom(Err(ShimError::Sandbox("agent busy".into())));
    sandbox.send_oom(Ok("c2".into()));
    sandbox.close_oom();

    assert_eq!(
        within("oom event", events.recv()).await.unwrap(),
        ShimEvent::Oom {
            container_id: "c2".into()
        }
    );
}

#[tokio::test]
async fn monitor_failure_fails_sandbox_root_start() {
    let ctx = TestContext::new();
    let container = ctx.add(Some(ContainerType::SandboxRoot), StdioConfig::default());
    ctx.sandbox.fail_on(SandboxOp::Monitor);

    assert!(ctx.service.start("c1", None).await.is_err());
    assert_eq!(container.process().exit.code(), Some(FAILED_START));
}
