//! End-to-end session behavior against the scripted runtime.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use sandhost_host::{
    CommandSpec, FailedStage, HostError, PipelineConfig, Session, SessionHost, SessionState,
};
use sandhost_protocol::{
    CorrelationId, FileTree, InboundEnvelope, InboundMessage, OutboundEnvelope, TargetOrigin,
};
use sandhost_runtime::testing::{INSTALL, MockRuntime, SERVE};

const PARENT: &str = "https://parent.example";
const PREVIEW: &str = "http://localhost:5173";

struct Harness {
    session: Session,
    outbound: mpsc::UnboundedReceiver<OutboundEnvelope>,
}

impl Harness {
    async fn boot(runtime: &MockRuntime, config: PipelineConfig) -> Self {
        let (tx, mut outbound) = mpsc::unbounded_channel();
        let host = SessionHost::new(Arc::new(runtime.clone()), config, tx);
        let session = host.boot().await.unwrap();

        let ready = next(&mut outbound).await;
        assert_eq!(ready.target, TargetOrigin::Any);
        assert_eq!(ready.message.to_value().unwrap(), json!({ "type": "ready" }));

        Self { session, outbound }
    }

    fn mount(&self, id: &str, files: Value) {
        self.session
            .deliver(InboundEnvelope::new(
                PARENT,
                InboundMessage::mount_request(id, FileTree::new(files)),
            ))
            .unwrap();
    }

    async fn next(&mut self) -> Value {
        let envelope = next(&mut self.outbound).await;
        assert_eq!(envelope.target, TargetOrigin::Exact(PARENT.to_string()));
        envelope.message.to_value().unwrap()
    }

    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(envelope) = self.outbound.try_recv() {
            panic!("unexpected outbound message: {:?}", envelope.message);
        }
    }

    async fn wait_for_state(&self, state: SessionState) {
        let mut status = self.session.watch_status();
        timeout(Duration::from_secs(5), status.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("status channel closed");
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<OutboundEnvelope>) -> OutboundEnvelope {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed")
}

fn project() -> Value {
    json!({ "package.json": "{\"name\":\"demo\"}" })
}

#[tokio::test]
async fn test_mount_install_serve_reports_url() {
    let runtime = MockRuntime::happy(PREVIEW);
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("abc", project());

    assert_eq!(
        h.next().await,
        json!({ "type": "MOUNT_FILES", "id": "abc", "success": true })
    );
    assert_eq!(
        h.next().await,
        json!({ "type": "SERVER_URL", "payload": { "url": PREVIEW } })
    );

    h.wait_for_state(SessionState::Live).await;
    let status = h.session.status();
    assert_eq!(status.message, "Server ready!");
    assert_eq!(h.session.preview_url().as_deref(), Some(PREVIEW));

    assert_eq!(runtime.mounts(), vec![FileTree::new(project())]);
    assert_eq!(runtime.spawns(), vec![INSTALL, SERVE]);
    h.assert_quiet().await;

    h.session.teardown().await;
}

#[tokio::test]
async fn test_process_output_is_drained_while_pipeline_runs() {
    let runtime = MockRuntime::happy(PREVIEW)
        .with_output(
            INSTALL,
            vec![
                "npm warn deprecated inflight@1.0.6\n\nadded 212 packages in 3s\n".to_string(),
                "found 0 vulnerabilities".to_string(),
            ],
        )
        .with_output(
            SERVE,
            vec![
                "> demo@0.0.0 dev\n> vite\n".to_string(),
                "  VITE v5.4.0  ready in 312 ms\n\n  ➜  Local:   http://localhost:5173/\n"
                    .to_string(),
            ],
        );
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("abc", project());

    // Install only exits once its output has been read to the end.
    assert_eq!(
        h.next().await,
        json!({ "type": "MOUNT_FILES", "id": "abc", "success": true })
    );
    assert_eq!(
        h.next().await,
        json!({ "type": "SERVER_URL", "payload": { "url": PREVIEW } })
    );
    h.wait_for_state(SessionState::Live).await;
    assert_eq!(runtime.spawns(), vec![INSTALL, SERVE]);
    h.assert_quiet().await;

    h.session.teardown().await;
}

#[tokio::test]
async fn test_mount_failure_reports_error() {
    let runtime = MockRuntime::happy(PREVIEW).fail_mount("disk full");
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("xyz", project());

    assert_eq!(
        h.next().await,
        json!({ "type": "ERROR", "id": "xyz", "payload": { "error": "disk full" } })
    );
    h.wait_for_state(SessionState::Failed(FailedStage::Mount)).await;
    assert_eq!(h.session.status().message, "Error: disk full");

    // No further pipeline progress.
    h.assert_quiet().await;
    assert!(runtime.spawns().is_empty());

    h.session.teardown().await;
}

#[tokio::test]
async fn test_install_failure_is_silent_by_default() {
    let runtime = MockRuntime::new()
        .with_exit_code(INSTALL, 1)
        .ready_on_spawn(SERVE, 5173, PREVIEW);
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("abc", project());
    assert_eq!(
        h.next().await,
        json!({ "type": "MOUNT_FILES", "id": "abc", "success": true })
    );

    h.wait_for_state(SessionState::Failed(FailedStage::Install)).await;
    assert_eq!(h.session.status().message, "Failed to install dependencies");
    h.assert_quiet().await;
    assert_eq!(runtime.spawns(), vec![INSTALL]);

    h.session.teardown().await;
}

#[tokio::test]
async fn test_install_failure_reported_when_enabled() {
    let runtime = MockRuntime::new().with_exit_code(INSTALL, 2);
    let config = PipelineConfig::default().with_report_install_failure(true);
    let mut h = Harness::boot(&runtime, config).await;

    h.mount("abc", project());
    let _ack = h.next().await;

    let error = h.next().await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["id"], "abc");
    assert!(
        error["payload"]["error"]
            .as_str()
            .unwrap()
            .contains("code 2")
    );

    h.session.teardown().await;
}

#[tokio::test]
async fn test_spawn_failure_reports_error() {
    let runtime = MockRuntime::happy(PREVIEW).fail_spawn(SERVE, "npm: not found");
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("s1", project());
    let _ack = h.next().await;
    assert_eq!(
        h.next().await,
        json!({ "type": "ERROR", "id": "s1", "payload": { "error": "npm: not found" } })
    );
    h.wait_for_state(SessionState::Failed(FailedStage::Serve)).await;

    h.session.teardown().await;
}

#[tokio::test]
async fn test_custom_commands_are_used() {
    let runtime = MockRuntime::new()
        .with_exit_code("pnpm install", 0)
        .ready_on_spawn("pnpm dev", 3000, "http://localhost:3000");
    let config = PipelineConfig::default()
        .with_install(CommandSpec::new("pnpm", ["install"]))
        .with_serve(CommandSpec::new("pnpm", ["dev"]));
    let mut h = Harness::boot(&runtime, config).await;

    h.mount("p", project());
    let _ack = h.next().await;
    assert_eq!(h.next().await["payload"]["url"], "http://localhost:3000");
    assert_eq!(runtime.spawns(), vec!["pnpm install", "pnpm dev"]);

    h.session.teardown().await;
}

#[tokio::test]
async fn test_mount_while_busy_is_rejected() {
    let runtime = MockRuntime::happy(PREVIEW);
    let gate = runtime.gate_mounts();
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("first", project());
    h.wait_for_state(SessionState::Mounting).await;
    h.mount("second", json!({ "other.txt": "x" }));

    let rejected = h.next().await;
    assert_eq!(rejected["type"], "ERROR");
    assert_eq!(rejected["id"], "second");

    gate.notify_one();
    assert_eq!(
        h.next().await,
        json!({ "type": "MOUNT_FILES", "id": "first", "success": true })
    );
    assert_eq!(h.next().await["type"], "SERVER_URL");

    // Only the first request reached the runtime.
    assert_eq!(runtime.mounts(), vec![FileTree::new(project())]);

    // Live is not re-enterable either.
    h.mount("third", project());
    let rejected = h.next().await;
    assert_eq!(rejected["type"], "ERROR");
    assert_eq!(rejected["id"], "third");

    h.session.teardown().await;
}

#[tokio::test]
async fn test_remount_after_failure_starts_fresh_pipeline() {
    let runtime = MockRuntime::happy(PREVIEW).fail_mount("disk full");
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("xyz", project());
    assert_eq!(h.next().await["type"], "ERROR");
    h.wait_for_state(SessionState::Failed(FailedStage::Mount)).await;

    runtime.clear_mount_failure();
    h.mount("retry", project());
    assert_eq!(
        h.next().await,
        json!({ "type": "MOUNT_FILES", "id": "retry", "success": true })
    );
    assert_eq!(h.next().await["type"], "SERVER_URL");
    assert_eq!(runtime.mounts().len(), 2);

    h.session.teardown().await;
}

#[tokio::test]
async fn test_server_url_sent_once_per_run() {
    let runtime = MockRuntime::happy(PREVIEW);
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("abc", project());
    let _ack = h.next().await;
    let _url = h.next().await;

    runtime.emit_server_ready(5174, "http://localhost:5174");
    h.assert_quiet().await;
    assert_eq!(h.session.preview_url().as_deref(), Some(PREVIEW));

    h.session.teardown().await;
}

#[tokio::test]
async fn test_message_right_after_boot_is_handled() {
    let runtime = MockRuntime::happy(PREVIEW);
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let host = SessionHost::new(Arc::new(runtime.clone()), PipelineConfig::default(), tx);

    let session = host.boot().await.unwrap();
    // Delivered synchronously after boot resolves, before reading anything.
    session
        .deliver(InboundEnvelope::new(
            PARENT,
            InboundMessage::mount_request("early", FileTree::new(project())),
        ))
        .unwrap();

    let first = next(&mut outbound).await;
    assert_eq!(first.message.kind(), "ready");
    let second = next(&mut outbound).await;
    assert_eq!(
        second.message.to_value().unwrap(),
        json!({ "type": "MOUNT_FILES", "id": "early", "success": true })
    );

    session.teardown().await;
}

#[tokio::test]
async fn test_unrecognized_and_malformed_messages() {
    let runtime = MockRuntime::happy(PREVIEW);
    let mut h = Harness::boot(&runtime, PipelineConfig::default()).await;

    for data in [
        json!({ "type": "PING", "id": "p" }),
        json!({ "payload": {} }),
        json!("just a string"),
        json!({ "type": "MOUNT_FILES", "payload": {} }),
    ] {
        h.session.deliver(InboundEnvelope::new(PARENT, data)).unwrap();
    }
    h.assert_quiet().await;

    h.session
        .deliver(InboundEnvelope::new(
            PARENT,
            json!({ "type": "MOUNT_FILES", "id": "bad" }),
        ))
        .unwrap();
    let error = h.next().await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["id"], "bad");

    assert_eq!(h.session.status().state, SessionState::Ready);
    assert!(runtime.mounts().is_empty());

    h.session.teardown().await;
}

#[tokio::test]
async fn test_responses_go_to_request_origin() {
    let runtime = MockRuntime::happy(PREVIEW);
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let host = SessionHost::new(Arc::new(runtime), PipelineConfig::default(), tx);
    let session = host.boot().await.unwrap();
    let _ready = next(&mut outbound).await;

    session
        .deliver(InboundEnvelope::new(
            "https://other.example",
            InboundMessage::mount_request(CorrelationId::new(json!(7)), FileTree::new(project())),
        ))
        .unwrap();

    let ack = next(&mut outbound).await;
    assert_eq!(
        ack.target,
        TargetOrigin::Exact("https://other.example".to_string())
    );
    // Non-string ids are echoed unchanged.
    assert_eq!(ack.message.to_value().unwrap()["id"], json!(7));

    let url = next(&mut outbound).await;
    assert_eq!(
        url.target,
        TargetOrigin::Exact("https://other.example".to_string())
    );

    session.teardown().await;
}

#[tokio::test]
async fn test_boot_failure_yields_no_session() {
    let runtime = MockRuntime::new().fail_boot("isolation unavailable");
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let host = SessionHost::new(Arc::new(runtime), PipelineConfig::default(), tx);
    let status = host.status();

    let err = host.boot().await.err().unwrap();
    assert!(matches!(err, HostError::Boot(_)));

    let status = status.borrow().clone();
    assert_eq!(status.state, SessionState::Failed(FailedStage::Boot));
    assert_eq!(status.message, "Error: isolation unavailable");
    // Nothing is reported to the parent.
    assert!(outbound.recv().await.is_none());
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let runtime = MockRuntime::happy(PREVIEW);

    // Never booted.
    let (tx, _rx) = mpsc::unbounded_channel();
    SessionHost::new(Arc::new(runtime.clone()), PipelineConfig::default(), tx).teardown();
    assert_eq!(runtime.teardown_count(), 0);

    let h = Harness::boot(&runtime, PipelineConfig::default()).await;
    h.session.teardown().await;
    h.session.teardown().await;
    assert_eq!(runtime.teardown_count(), 1);

    let err = h
        .session
        .deliver(InboundEnvelope::new(PARENT, project()))
        .unwrap_err();
    assert!(matches!(err, HostError::Closed));
}

#[tokio::test]
async fn test_teardown_waits_for_mount_in_flight() {
    let runtime = MockRuntime::happy(PREVIEW);
    let gate = runtime.gate_mounts();
    let h = Harness::boot(&runtime, PipelineConfig::default()).await;

    h.mount("abc", project());
    h.wait_for_state(SessionState::Mounting).await;

    let Harness {
        session,
        outbound: _outbound,
    } = h;
    let teardown = tokio::spawn(async move { session.teardown().await });

    // The sandbox is not released while the tree is still being written.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!teardown.is_finished());
    assert_eq!(runtime.teardown_count(), 0);

    gate.notify_one();
    timeout(Duration::from_secs(5), teardown)
        .await
        .expect("teardown did not finish")
        .unwrap();
    assert_eq!(runtime.teardown_count(), 1);
    assert_eq!(runtime.mounts().len(), 1);
}
