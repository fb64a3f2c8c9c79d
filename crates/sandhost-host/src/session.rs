//! Session lifecycle: boot, then an actor that serializes inbound messages
//! and pipeline stage completions.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use sandhost_protocol::{
    CorrelationId, FileTree, InboundEnvelope, InboundMessage, OutboundEnvelope, OutboundMessage,
};
use sandhost_runtime::{
    ExitFuture, OutputStream, RuntimeError, RuntimeResult, ServerReady, SharedHandle,
    SharedRuntime,
};

use crate::error::{HostError, HostResult};
use crate::pipeline::PipelineConfig;
use crate::state::{FailedStage, SessionState, SessionStatus};

/// Channel the host writes outbound messages to.
pub type OutboundSender = mpsc::UnboundedSender<OutboundEnvelope>;

/// Stage helper tasks, joined at teardown before the runtime handle goes away.
type Helpers = Arc<Mutex<JoinSet<()>>>;

// ─────────────────────────────────────────────────────────────────────────────
// SessionHost
// ─────────────────────────────────────────────────────────────────────────────

/// A session that has not booted yet.
pub struct SessionHost {
    runtime: SharedRuntime,
    config: PipelineConfig,
    outbound: OutboundSender,
    status: watch::Sender<SessionStatus>,
}

impl SessionHost {
    /// Create a host that will boot one sandbox from `runtime` and write
    /// outbound messages to `outbound`.
    pub fn new(runtime: SharedRuntime, config: PipelineConfig, outbound: OutboundSender) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            runtime,
            config,
            outbound,
            status,
        }
    }

    /// Subscribe to status updates. The receiver outlives the host, so it
    /// still shows the failure after a failed boot.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Boot the sandbox and announce `ready` to any origin.
    ///
    /// `ready` is sent before the returned [`Session`] exists, so no inbound
    /// message can be handled ahead of it. A boot failure is reflected in the
    /// status only; nothing is sent to the parent.
    pub async fn boot(self) -> HostResult<Session> {
        tracing::info!(runtime = self.runtime.name(), "Booting sandbox");

        let handle = match self.runtime.boot().await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Sandbox boot failed");
                self.status.send_replace(SessionStatus::error(FailedStage::Boot, &e.detail()));
                return Err(HostError::Boot(e));
            }
        };

        self.status.send_replace(SessionStatus::new(SessionState::Ready));
        if self
            .outbound
            .send(OutboundEnvelope::broadcast(OutboundMessage::ready()))
            .is_err()
        {
            tracing::warn!("Parent channel closed before ready was sent");
        }
        tracing::info!("Sandbox ready");

        Ok(Session::start(handle, self.config, self.outbound, self.status))
    }

    /// Discard a host that never booted. Nothing to release.
    pub fn teardown(self) {
        tracing::debug!("Discarding session host before boot");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// A booted session. Owns the runtime handle until [`Session::teardown`].
pub struct Session {
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    handle: SharedHandle,
    shutdown: CancellationToken,
    actor: Mutex<Option<JoinHandle<()>>>,
    helpers: Helpers,
    torn_down: AtomicBool,
}

impl Session {
    fn start(
        handle: SharedHandle,
        config: PipelineConfig,
        outbound: OutboundSender,
        status_tx: watch::Sender<SessionStatus>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let status = status_tx.subscribe();
        let helpers = Helpers::default();

        let actor = SessionActor {
            handle: Arc::clone(&handle),
            config,
            outbound,
            status: status_tx,
            events: events_tx.clone(),
            shutdown: shutdown.clone(),
            helpers: Arc::clone(&helpers),
            state: SessionState::Ready,
            run: 0,
            current: None,
            preview_url: None,
        };
        let task = tokio::spawn(actor.run(events_rx));

        Self {
            events: events_tx,
            status,
            handle,
            shutdown,
            actor: Mutex::new(Some(task)),
            helpers,
            torn_down: AtomicBool::new(false),
        }
    }

    /// Hand an inbound message to the session. Messages are processed in
    /// delivery order.
    pub fn deliver(&self, envelope: InboundEnvelope) -> HostResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(HostError::Closed);
        }
        self.events
            .send(SessionEvent::Inbound(envelope))
            .map_err(|_| HostError::Closed)
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status updates.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Preview address once the server is live.
    pub fn preview_url(&self) -> Option<String> {
        self.status.borrow().preview_url.clone()
    }

    /// Stop the session and release the runtime handle. Safe to call twice.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let actor = self.actor.lock().take();
        if let Some(actor) = actor
            && let Err(e) = actor.await
        {
            tracing::warn!(error = %e, "Session actor ended abnormally");
        }

        // A helper can still be finishing a mount; let it land before the
        // runtime removes the sandbox.
        loop {
            let mut helpers = std::mem::take(&mut *self.helpers.lock());
            if helpers.is_empty() {
                break;
            }
            while let Some(result) = helpers.join_next().await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    tracing::warn!(error = %e, "Session helper panicked");
                }
            }
        }

        self.handle.teardown().await;
        tracing::info!("Session torn down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the actor reacts to. Stage events carry the run they belong to.
#[derive(Debug)]
enum SessionEvent {
    Inbound(InboundEnvelope),
    Mounted {
        run: u64,
        result: RuntimeResult<()>,
    },
    InstallExited {
        run: u64,
        code: i32,
    },
    SpawnFailed {
        run: u64,
        stage: FailedStage,
        error: RuntimeError,
    },
    ServerReady {
        run: u64,
        ready: ServerReady,
    },
}

/// The mount request a pipeline run answers to.
#[derive(Debug)]
struct PipelineRun {
    origin: String,
    id: Option<CorrelationId>,
}

struct SessionActor {
    handle: SharedHandle,
    config: PipelineConfig,
    outbound: OutboundSender,
    status: watch::Sender<SessionStatus>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
    helpers: Helpers,
    state: SessionState,
    run: u64,
    current: Option<PipelineRun>,
    preview_url: Option<String>,
}

impl SessionActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event);
        }
        tracing::debug!(state = %self.state, "Session actor stopped");
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound(envelope) => self.on_inbound(envelope),
            SessionEvent::Mounted { run, result } => {
                if self.is_current(run, SessionState::Mounting) {
                    self.on_mounted(result);
                }
            }
            SessionEvent::InstallExited { run, code } => {
                if self.is_current(run, SessionState::Installing) {
                    self.on_install_exited(code);
                }
            }
            SessionEvent::SpawnFailed { run, stage, error } => {
                let expected = match stage {
                    FailedStage::Serve => SessionState::Serving,
                    _ => SessionState::Installing,
                };
                if self.is_current(run, expected) {
                    self.fail(stage, &error);
                }
            }
            SessionEvent::ServerReady { run, ready } => {
                if self.is_current(run, SessionState::Serving) {
                    self.on_server_ready(ready);
                }
            }
        }
    }

    fn is_current(&self, run: u64, expected: SessionState) -> bool {
        let current = run == self.run && self.state == expected;
        if !current {
            tracing::debug!(
                run,
                current_run = self.run,
                state = %self.state,
                "Discarding stale pipeline event"
            );
        }
        current
    }

    fn on_inbound(&mut self, envelope: InboundEnvelope) {
        let InboundEnvelope { origin, data } = envelope;
        match InboundMessage::decode(&data) {
            InboundMessage::MountFiles { id, files } => self.start_pipeline(origin, id, files),
            InboundMessage::Malformed { id, kind, reason } => {
                tracing::warn!(%origin, %kind, %reason, "Malformed message");
                if id.is_some() {
                    self.send(
                        &origin,
                        OutboundMessage::error(id, format!("Invalid {kind} message: {reason}")),
                    );
                }
            }
            InboundMessage::Unrecognized { kind } => {
                tracing::debug!(
                    %origin,
                    kind = kind.as_deref().unwrap_or("<none>"),
                    "Ignoring unrecognized message"
                );
            }
        }
    }

    fn start_pipeline(&mut self, origin: String, id: Option<CorrelationId>, files: FileTree) {
        if !self.state.accepts_mount() {
            tracing::warn!(%origin, state = %self.state, "Rejecting mount, pipeline already active");
            self.send(
                &origin,
                OutboundMessage::error(
                    id,
                    format!("A pipeline is already in progress ({})", self.state),
                ),
            );
            return;
        }

        self.run += 1;
        let run = self.run;
        tracing::info!(run, %origin, entries = ?files.top_level_len(), "Mounting project files");

        self.current = Some(PipelineRun { origin, id });
        self.preview_url = None;
        self.transition(SessionState::Mounting);

        let handle = Arc::clone(&self.handle);
        let events = self.events.clone();
        // Not cancelled: a half-written tree must not race the sandbox cleanup.
        track(&self.helpers, async move {
            let result = handle.mount(&files).await;
            let _ = events.send(SessionEvent::Mounted { run, result });
        });
    }

    fn on_mounted(&mut self, result: RuntimeResult<()>) {
        match result {
            Ok(()) => {
                self.reply(OutboundMessage::mount_success(self.current_id()));
                self.transition(SessionState::Installing);
                self.spawn_install();
            }
            Err(e) => self.fail(FailedStage::Mount, &e),
        }
    }

    fn spawn_install(&self) {
        let run = self.run;
        let spec = self.config.install.clone();
        let handle = Arc::clone(&self.handle);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let helpers = Arc::clone(&self.helpers);

        self.spawn_stage(async move {
            let line = spec.line();
            tracing::info!(run, command = %line, "Installing dependencies");

            let process = match handle.spawn(&spec.command, &spec.args).await {
                Ok(process) => process,
                Err(error) => {
                    let _ = events.send(SessionEvent::SpawnFailed {
                        run,
                        stage: FailedStage::Install,
                        error,
                    });
                    return;
                }
            };

            let (output, exit) = process.into_parts();
            track(&helpers, drain_output(line, output, shutdown));

            let code = match exit.await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(run, error = %e, "Lost track of install process");
                    -1
                }
            };
            let _ = events.send(SessionEvent::InstallExited { run, code });
        });
    }

    fn on_install_exited(&mut self, code: i32) {
        if code == 0 {
            tracing::info!(run = self.run, "Dependencies installed");
            self.transition(SessionState::Serving);
            self.spawn_serve();
            return;
        }

        tracing::warn!(run = self.run, code, "Dependency installation failed");
        self.transition(SessionState::Failed(FailedStage::Install));
        if self.config.report_install_failure {
            self.reply(OutboundMessage::error(
                self.current_id(),
                format!("Dependency installation exited with code {code}"),
            ));
        }
    }

    fn spawn_serve(&self) {
        let run = self.run;
        let spec = self.config.serve.clone();
        let handle = Arc::clone(&self.handle);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let helpers = Arc::clone(&self.helpers);

        // Subscribe before spawning so a server that is ready immediately is
        // not missed.
        let mut ready = handle.server_ready();

        self.spawn_stage(async move {
            let line = spec.line();
            tracing::info!(run, command = %line, "Starting development server");

            let process = match handle.spawn(&spec.command, &spec.args).await {
                Ok(process) => process,
                Err(error) => {
                    let _ = events.send(SessionEvent::SpawnFailed {
                        run,
                        stage: FailedStage::Serve,
                        error,
                    });
                    return;
                }
            };

            let (output, exit) = process.into_parts();
            track(&helpers, drain_output(line.clone(), output, shutdown.clone()));
            track(&helpers, log_exit(line, exit, shutdown));

            loop {
                match ready.recv().await {
                    Ok(event) => {
                        let _ = events.send(SessionEvent::ServerReady { run, ready: event });
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(run, skipped, "Missed server-ready events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!(run, "Runtime stopped reporting server readiness");
                        break;
                    }
                }
            }
        });
    }

    fn on_server_ready(&mut self, ready: ServerReady) {
        tracing::info!(run = self.run, port = ready.port, url = %ready.url, "Server ready");
        self.preview_url = Some(ready.url.clone());
        self.transition(SessionState::Live);
        self.reply(OutboundMessage::server_url(ready.url));
    }

    /// Fail the current run and answer the mount request with the error.
    fn fail(&mut self, stage: FailedStage, error: &RuntimeError) {
        let detail = error.detail();
        tracing::error!(run = self.run, %stage, error = %error, "Pipeline stage failed");

        self.reply(OutboundMessage::error(self.current_id(), detail.clone()));
        self.state = SessionState::Failed(stage);
        self.status.send_replace(SessionStatus::error(stage, &detail));
    }

    fn transition(&mut self, state: SessionState) {
        tracing::debug!(from = %self.state, to = %state, "Session state changed");
        self.state = state;
        self.status
            .send_replace(SessionStatus::new(state).with_preview_url(self.preview_url.clone()));
    }

    fn current_id(&self) -> Option<CorrelationId> {
        self.current.as_ref().and_then(|c| c.id.clone())
    }

    /// Send to the origin of the current mount request.
    fn reply(&self, message: OutboundMessage) {
        match &self.current {
            Some(current) => self.send(&current.origin, message),
            None => tracing::warn!(kind = message.kind(), "No mount request to reply to"),
        }
    }

    fn send(&self, origin: &str, message: OutboundMessage) {
        let kind = message.kind();
        if self
            .outbound
            .send(OutboundEnvelope::to(origin, message))
            .is_err()
        {
            tracing::debug!(kind, "Parent channel closed, dropping message");
        }
    }

    /// Run stage work in a helper task that stops at teardown.
    fn spawn_stage<F>(&self, stage: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        track(&self.helpers, async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = stage => {}
            }
        });
    }
}

/// Spawn a helper task the session waits for at teardown.
fn track<F>(helpers: &Helpers, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut helpers = helpers.lock();
    while helpers.try_join_next().is_some() {}
    helpers.spawn(task);
}

/// Log process output line by line until it ends or the session stops.
async fn drain_output(command: String, mut output: OutputStream, shutdown: CancellationToken) {
    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break,
            chunk = output.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!(target: "sandhost::process", command = %command, "{}", line);
        }
    }
}

/// The serve process is expected to run forever; its exit is only logged.
async fn log_exit(command: String, exit: ExitFuture, shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = exit => match result {
            Ok(code) => tracing::warn!(command = %command, code, "Server process exited"),
            Err(e) => tracing::warn!(command = %command, error = %e, "Lost track of server process"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandhost_protocol::TargetOrigin;
    use sandhost_runtime::testing::MockRuntime;
    use serde_json::json;
    use std::time::Duration;

    async fn booted(
        runtime: MockRuntime,
    ) -> (Session, mpsc::UnboundedReceiver<OutboundEnvelope>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = SessionHost::new(Arc::new(runtime), PipelineConfig::default(), tx);
        let session = host.boot().await.unwrap();
        let ready = rx.recv().await.unwrap();
        assert_eq!(ready.target, TargetOrigin::Any);
        (session, rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_stale_mount_result_is_discarded() {
        let runtime = MockRuntime::happy("http://localhost:5173");
        let gate = runtime.gate_mounts();
        let (session, mut rx) = booted(runtime.clone()).await;

        session
            .deliver(InboundEnvelope::new(
                "https://parent.test",
                InboundMessage::mount_request("one", FileTree::new(json!({}))),
            ))
            .unwrap();
        settle().await;
        assert_eq!(session.status().state, SessionState::Mounting);

        // A completion tagged with a run that never existed changes nothing.
        session
            .events
            .send(SessionEvent::Mounted {
                run: 7,
                result: Ok(()),
            })
            .unwrap();
        settle().await;
        assert_eq!(session.status().state, SessionState::Mounting);
        assert!(rx.try_recv().is_err());

        gate.notify_one();
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.message, OutboundMessage::mount_success(Some("one".into())));

        session.teardown().await;
    }

    #[tokio::test]
    async fn test_server_ready_outside_serving_is_ignored() {
        let runtime = MockRuntime::new().with_exit_code("npm install", 1);
        let (session, mut rx) = booted(runtime).await;

        session
            .deliver(InboundEnvelope::new(
                "https://parent.test",
                InboundMessage::mount_request("a", FileTree::new(json!({}))),
            ))
            .unwrap();
        let _ack = rx.recv().await.unwrap();
        settle().await;
        assert_eq!(
            session.status().state,
            SessionState::Failed(FailedStage::Install)
        );

        session
            .events
            .send(SessionEvent::ServerReady {
                run: 1,
                ready: ServerReady::new(5173, "http://localhost:5173"),
            })
            .unwrap();
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.preview_url(), None);

        session.teardown().await;
    }
}
