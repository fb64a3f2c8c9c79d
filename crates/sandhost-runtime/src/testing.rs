//! Scripted runtime for tests.
//!
//! [`MockRuntime`] records every call and answers according to a script:
//! which calls fail, what exit code each command line produces, and which
//! command lines trigger a server-ready event when spawned. Command lines
//! without a scripted exit code never exit, like a dev server. A scripted
//! exit resolves only after the output stream has been read to the end or
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, oneshot};

use sandhost_protocol::FileTree;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{
    ExitFuture, ProcessRun, SandboxHandle, SandboxRuntime, ServerReady, SharedHandle, command_line,
};

/// Default install command line of the pipeline.
pub const INSTALL: &str = "npm install";

/// Default serve command line of the pipeline.
pub const SERVE: &str = "npm run dev";

struct MockState {
    boot_error: Mutex<Option<String>>,
    mount_error: Mutex<Option<String>>,
    mount_gate: Mutex<Option<Arc<Notify>>>,
    spawn_errors: Mutex<HashMap<String, String>>,
    exit_codes: Mutex<HashMap<String, i32>>,
    outputs: Mutex<HashMap<String, Vec<String>>>,
    ready_on_spawn: Mutex<HashMap<String, ServerReady>>,
    mounts: Mutex<Vec<FileTree>>,
    spawns: Mutex<Vec<String>>,
    boots: AtomicUsize,
    teardowns: AtomicUsize,
    ready_tx: broadcast::Sender<ServerReady>,
}

/// A runtime that follows a script instead of running anything.
#[derive(Clone)]
pub struct MockRuntime {
    state: Arc<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// A runtime where every call succeeds and no process ever exits.
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(MockState {
                boot_error: Mutex::new(None),
                mount_error: Mutex::new(None),
                mount_gate: Mutex::new(None),
                spawn_errors: Mutex::new(HashMap::new()),
                exit_codes: Mutex::new(HashMap::new()),
                outputs: Mutex::new(HashMap::new()),
                ready_on_spawn: Mutex::new(HashMap::new()),
                mounts: Mutex::new(Vec::new()),
                spawns: Mutex::new(Vec::new()),
                boots: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                ready_tx,
            }),
        }
    }

    /// Install exits 0 and the serve command reports `url` on port 5173.
    pub fn happy(url: impl Into<String>) -> Self {
        Self::new()
            .with_exit_code(INSTALL, 0)
            .ready_on_spawn(SERVE, 5173, url)
    }

    /// Make `boot` fail with `message`.
    pub fn fail_boot(self, message: impl Into<String>) -> Self {
        *self.state.boot_error.lock() = Some(message.into());
        self
    }

    /// Make `mount` fail with `message`.
    pub fn fail_mount(self, message: impl Into<String>) -> Self {
        *self.state.mount_error.lock() = Some(message.into());
        self
    }

    /// Clear a scripted mount failure.
    pub fn clear_mount_failure(&self) {
        *self.state.mount_error.lock() = None;
    }

    /// Make spawning `command_line` fail with `message`.
    pub fn fail_spawn(self, command_line: impl Into<String>, message: impl Into<String>) -> Self {
        self.state
            .spawn_errors
            .lock()
            .insert(command_line.into(), message.into());
        self
    }

    /// Make `command_line` exit with `code` right after it is spawned.
    pub fn with_exit_code(self, command_line: impl Into<String>, code: i32) -> Self {
        self.state.exit_codes.lock().insert(command_line.into(), code);
        self
    }

    /// Output chunks `command_line` produces.
    pub fn with_output(self, command_line: impl Into<String>, chunks: Vec<String>) -> Self {
        self.state.outputs.lock().insert(command_line.into(), chunks);
        self
    }

    /// Emit a server-ready event whenever `command_line` is spawned.
    pub fn ready_on_spawn(
        self,
        command_line: impl Into<String>,
        port: u16,
        url: impl Into<String>,
    ) -> Self {
        self.state
            .ready_on_spawn
            .lock()
            .insert(command_line.into(), ServerReady::new(port, url));
        self
    }

    /// Hold every mount until the returned gate is notified once per mount.
    pub fn gate_mounts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.mount_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Emit a server-ready event now.
    pub fn emit_server_ready(&self, port: u16, url: impl Into<String>) {
        let _ = self.state.ready_tx.send(ServerReady::new(port, url));
    }

    /// File trees passed to `mount`, in call order.
    pub fn mounts(&self) -> Vec<FileTree> {
        self.state.mounts.lock().clone()
    }

    /// Command lines passed to `spawn`, in call order.
    pub fn spawns(&self) -> Vec<String> {
        self.state.spawns.lock().clone()
    }

    /// Number of `boot` calls.
    pub fn boot_count(&self) -> usize {
        self.state.boots.load(Ordering::SeqCst)
    }

    /// Number of `teardown` calls.
    pub fn teardown_count(&self) -> usize {
        self.state.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    async fn boot(&self) -> RuntimeResult<SharedHandle> {
        self.state.boots.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.boot_error.lock().clone() {
            return Err(RuntimeError::Boot(message));
        }
        Ok(Arc::new(MockHandle {
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Handle returned by [`MockRuntime::boot`].
pub struct MockHandle {
    state: Arc<MockState>,
}

#[async_trait]
impl SandboxHandle for MockHandle {
    async fn mount(&self, files: &FileTree) -> RuntimeResult<()> {
        self.state.mounts.lock().push(files.clone());

        let gate = self.state.mount_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.state.mount_error.lock().clone() {
            Some(message) => Err(RuntimeError::Mount(message)),
            None => Ok(()),
        }
    }

    async fn spawn(&self, command: &str, args: &[String]) -> RuntimeResult<ProcessRun> {
        let line = command_line(command, args);
        self.state.spawns.lock().push(line.clone());

        if let Some(message) = self.state.spawn_errors.lock().get(&line).cloned() {
            return Err(RuntimeError::Spawn {
                command: line,
                message,
            });
        }

        let chunks = self
            .state
            .outputs
            .lock()
            .get(&line)
            .cloned()
            .unwrap_or_default();
        let (drained_tx, drained_rx) = oneshot::channel::<()>();
        let mut drained_tx = Some(drained_tx);
        let output = futures::stream::iter(chunks)
            .chain(futures::stream::poll_fn(move |_| {
                if let Some(tx) = drained_tx.take() {
                    let _ = tx.send(());
                }
                Poll::Ready(None)
            }))
            .boxed();

        let exit: ExitFuture = match self.state.exit_codes.lock().get(&line).copied() {
            Some(code) => async move {
                let _ = drained_rx.await;
                Ok(code)
            }
            .boxed(),
            None => futures::future::pending().boxed(),
        };

        if let Some(ready) = self.state.ready_on_spawn.lock().get(&line).cloned() {
            let _ = self.state.ready_tx.send(ready);
        }

        Ok(ProcessRun::new(line, output, exit))
    }

    fn server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.state.ready_tx.subscribe()
    }

    async fn teardown(&self) {
        self.state.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}
