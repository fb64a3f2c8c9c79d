//! Local process runtime.
//!
//! Each sandbox is a working directory below the configured root. Processes
//! run as children of the host with that directory as their cwd. Server
//! readiness is detected from process output and confirmed with a TCP probe.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpStream, lookup_host};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sandhost_protocol::FileTree;

use crate::config::LocalRuntimeConfig;
use crate::detect::DevServerDetector;
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{
    ProcessRun, SandboxHandle, SandboxRuntime, ServerReady, SharedHandle, command_line,
};
use crate::tree::{flatten, write_entries};

/// Capacity of the server-ready broadcast channel.
const READY_CHANNEL_CAPACITY: usize = 16;

/// Runtime that hosts sandboxes as local working directories.
pub struct LocalRuntime {
    config: LocalRuntimeConfig,
    detector: DevServerDetector,
}

impl LocalRuntime {
    /// Create a runtime.
    pub fn new(config: LocalRuntimeConfig) -> Self {
        Self {
            config,
            detector: DevServerDetector::new(),
        }
    }

    /// The runtime configuration.
    pub fn config(&self) -> &LocalRuntimeConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    async fn boot(&self) -> RuntimeResult<SharedHandle> {
        let workdir = self.config.root.join(Uuid::new_v4().to_string());

        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            RuntimeError::Boot(format!("cannot create {}: {}", workdir.display(), e))
        })?;

        tracing::info!(workdir = %workdir.display(), "Booted local sandbox");

        Ok(Arc::new(LocalHandle::new(
            workdir,
            self.config.clone(),
            self.detector,
        )))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Shared state for readiness probing.
struct ReadyProbe {
    ready_tx: broadcast::Sender<ServerReady>,
    probed: Mutex<HashSet<u16>>,
    shutdown: CancellationToken,
    config: LocalRuntimeConfig,
}

impl ReadyProbe {
    /// Start probing `port` unless it is already being watched.
    fn watch_port(self: &Arc<Self>, port: u16) {
        if !self.probed.lock().insert(port) {
            return;
        }

        tracing::debug!(port, "Detected dev server port, probing");

        let probe = Arc::clone(self);
        tokio::spawn(async move {
            let host = probe.config.probe_host.clone();
            loop {
                tokio::select! {
                    _ = probe.shutdown.cancelled() => return,
                    reachable = is_reachable(&host, port) => {
                        if reachable {
                            break;
                        }
                    }
                }
                tokio::select! {
                    _ = probe.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(probe.config.probe_interval) => {}
                }
            }

            let url = format!("http://{}:{}", probe.config.preview_host, port);
            tracing::info!(port, url = %url, "Server ready");
            // No subscribers is fine: nobody is waiting for this port.
            let _ = probe.ready_tx.send(ServerReady::new(port, url));
        });
    }
}

/// Addresses to try for `host:port`.
///
/// A loopback host also covers the other loopback family: dev servers that
/// bind `localhost` may listen on `::1` only.
async fn loopback_aware_addrs(host: &str, port: u16) -> Vec<SocketAddr> {
    let mut addrs: Vec<SocketAddr> = match lookup_host((host, port)).await {
        Ok(found) => found.collect(),
        Err(e) => {
            tracing::debug!(host, error = %e, "Cannot resolve probe host");
            Vec::new()
        }
    };

    if addrs.is_empty() || addrs.iter().any(|addr| addr.ip().is_loopback()) {
        for ip in [IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)] {
            let addr = SocketAddr::new(ip, port);
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
    }
    addrs
}

/// Whether any address of `host:port` accepts a connection.
async fn is_reachable(host: &str, port: u16) -> bool {
    for addr in loopback_aware_addrs(host, port).await {
        if TcpStream::connect(addr).await.is_ok() {
            return true;
        }
    }
    false
}

/// A booted local sandbox.
pub struct LocalHandle {
    workdir: PathBuf,
    detector: DevServerDetector,
    probe: Arc<ReadyProbe>,
    torn_down: AtomicBool,
}

impl LocalHandle {
    fn new(workdir: PathBuf, config: LocalRuntimeConfig, detector: DevServerDetector) -> Self {
        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self {
            workdir,
            detector,
            probe: Arc::new(ReadyProbe {
                ready_tx,
                probed: Mutex::new(HashSet::new()),
                shutdown: CancellationToken::new(),
                config,
            }),
            torn_down: AtomicBool::new(false),
        }
    }

    /// The sandbox working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ensure_live(&self) -> RuntimeResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            Err(RuntimeError::TornDown)
        } else {
            Ok(())
        }
    }

    /// Forward lines from `reader` into `tx`, watching for server addresses.
    fn pump<R>(&self, reader: R, tx: mpsc::UnboundedSender<String>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let detector = self.detector;
        let probe = Arc::clone(&self.probe);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(port) = detector.detect_port(&line) {
                    probe.watch_port(port);
                }
                // Keep reading after the consumer is gone so the pipe never fills up.
                let _ = tx.send(format!("{line}\n"));
            }
        });
    }
}

#[async_trait]
impl SandboxHandle for LocalHandle {
    async fn mount(&self, files: &FileTree) -> RuntimeResult<()> {
        self.ensure_live()?;

        let entries = flatten(files)?;
        write_entries(&self.workdir, &entries)
            .await
            .map_err(|e| match e {
                RuntimeError::Io(io) => RuntimeError::Mount(io.to_string()),
                other => other,
            })?;

        tracing::debug!(
            workdir = %self.workdir.display(),
            entries = entries.len(),
            "Mounted file tree"
        );
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> RuntimeResult<ProcessRun> {
        self.ensure_live()?;

        let line = command_line(command, args);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.probe.config.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| RuntimeError::Spawn {
            command: line.clone(),
            message: e.to_string(),
        })?;

        tracing::info!(command = %line, pid = ?child.id(), "Spawned process");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            self.pump(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.pump(stderr, tx);
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let shutdown = self.probe.shutdown.clone();
        let supervised = line.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => status
                    .map(|s| s.code().unwrap_or(-1))
                    .map_err(RuntimeError::Io),
                _ = shutdown.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(command = %supervised, error = %e, "Failed to kill process");
                    }
                    Err(RuntimeError::TornDown)
                }
            };
            let _ = exit_tx.send(result);
        });

        let output = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        let lost = line.clone();
        let exit = async move {
            match exit_rx.await {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::ProcessLost(lost)),
            }
        }
        .boxed();

        Ok(ProcessRun::new(line, output, exit))
    }

    fn server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.probe.ready_tx.subscribe()
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.probe.shutdown.cancel();

        if self.probe.config.cleanup_on_teardown {
            match tokio::fs::remove_dir_all(&self.workdir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    workdir = %self.workdir.display(),
                    error = %e,
                    "Failed to remove sandbox directory"
                ),
            }
        }

        tracing::info!(workdir = %self.workdir.display(), "Tore down local sandbox");
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        self.probe.shutdown.cancel();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn runtime(root: &Path) -> LocalRuntime {
        LocalRuntime::new(
            LocalRuntimeConfig::new()
                .with_root(root)
                .with_probe_interval(Duration::from_millis(20)),
        )
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_boot_mount_and_teardown() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        handle
            .mount(&FileTree::new(json!({ "package.json": "{}" })))
            .await
            .unwrap();

        let sessions: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(sessions.len(), 1);
        let workdir = sessions[0].as_ref().unwrap().path();
        assert!(workdir.join("package.json").exists());

        handle.teardown().await;
        assert!(!workdir.exists());

        // Second teardown is a no-op.
        handle.teardown().await;

        let err = handle
            .mount(&FileTree::new(json!({ "a": "b" })))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::TornDown));
    }

    #[tokio::test]
    async fn test_mount_invalid_tree() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let err = handle
            .mount(&FileTree::new(json!({ "..": "escape" })))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTree { .. }));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_spawn_collects_output_and_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let run = handle
            .spawn("sh", &args(&["-c", "echo hello; echo oops 1>&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(run.command(), "sh -c echo hello; echo oops 1>&2; exit 3");

        let (output, exit) = run.into_parts();
        let chunks: Vec<String> = output.collect().await;
        assert!(chunks.contains(&"hello\n".to_string()));
        assert!(chunks.contains(&"oops\n".to_string()));
        assert_eq!(exit.await.unwrap(), 3);

        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let err = handle
            .spawn("definitely-not-a-real-command-sandhost", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_server_ready_after_listener_is_reachable() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut ready = handle.server_ready();
        let script = format!("echo '  Local:   http://localhost:{port}/'; sleep 5");
        let run = handle.spawn("sh", &args(&["-c", &script])).await.unwrap();
        let (_output, _exit) = run.into_parts();

        let event = tokio::time::timeout(Duration::from_secs(5), ready.recv())
            .await
            .expect("server-ready not emitted")
            .unwrap();
        assert_eq!(event.port, port);
        assert_eq!(event.url, format!("http://localhost:{port}"));

        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_server_ready_for_ipv6_only_listener() {
        // Hosts without IPv6 loopback cannot run this check.
        let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();

        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let mut ready = handle.server_ready();
        let script = format!("echo '  Local:   http://localhost:{port}/'; sleep 5");
        let run = handle.spawn("sh", &args(&["-c", &script])).await.unwrap();
        let (_output, _exit) = run.into_parts();

        let event = tokio::time::timeout(Duration::from_secs(3), ready.recv())
            .await
            .expect("server-ready not emitted for IPv6-only server")
            .unwrap();
        assert_eq!(event.port, port);
        assert_eq!(event.url, format!("http://localhost:{port}"));

        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_loopback_host_covers_both_families() {
        let addrs = loopback_aware_addrs("127.0.0.1", 5173).await;
        assert_eq!(
            addrs,
            vec![
                SocketAddr::from(([127, 0, 0, 1], 5173)),
                SocketAddr::from((Ipv6Addr::LOCALHOST, 5173)),
            ]
        );

        let addrs = loopback_aware_addrs("localhost", 5173).await;
        assert!(addrs.contains(&SocketAddr::from(([127, 0, 0, 1], 5173))));
        assert!(addrs.contains(&SocketAddr::from((Ipv6Addr::LOCALHOST, 5173))));
    }

    #[tokio::test]
    async fn test_teardown_kills_running_process() {
        let root = tempfile::tempdir().unwrap();
        let handle = runtime(root.path()).boot().await.unwrap();

        let run = handle.spawn("sleep", &args(&["30"])).await.unwrap();
        let (_output, exit) = run.into_parts();

        handle.teardown().await;

        let result = tokio::time::timeout(Duration::from_secs(5), exit)
            .await
            .expect("process was not stopped");
        assert!(matches!(result, Err(RuntimeError::TornDown)));
    }
}
