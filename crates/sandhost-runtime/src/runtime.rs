//! Runtime traits and process types.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use sandhost_protocol::FileTree;

use crate::error::RuntimeResult;

/// Lazy, in-order stream of output chunks from a process.
pub type OutputStream = BoxStream<'static, String>;

/// Resolves to the exit code of a process.
pub type ExitFuture = BoxFuture<'static, RuntimeResult<i32>>;

/// A running process inside the sandbox.
pub struct ProcessRun {
    command: String,
    output: OutputStream,
    exit: ExitFuture,
}

impl ProcessRun {
    /// Create a process run from its parts.
    pub fn new(command: impl Into<String>, output: OutputStream, exit: ExitFuture) -> Self {
        Self {
            command: command.into(),
            output,
            exit,
        }
    }

    /// The command line this run was started with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Split into the output stream and the exit future.
    pub fn into_parts(self) -> (OutputStream, ExitFuture) {
        (self.output, self.exit)
    }
}

impl fmt::Debug for ProcessRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRun")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// A network listener inside the sandbox became reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    /// Port the server listens on.
    pub port: u16,
    /// Address a preview should load.
    pub url: String,
}

impl ServerReady {
    /// Create a readiness event.
    pub fn new(port: u16, url: impl Into<String>) -> Self {
        Self {
            port,
            url: url.into(),
        }
    }
}

/// Something that can start sandboxes.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Boot a new, empty sandbox.
    async fn boot(&self) -> RuntimeResult<SharedHandle>;

    /// Name of this runtime, for logs.
    fn name(&self) -> &str;
}

/// A booted sandbox instance.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Write a file tree into the sandbox.
    async fn mount(&self, files: &FileTree) -> RuntimeResult<()>;

    /// Start `command` with `args`.
    async fn spawn(&self, command: &str, args: &[String]) -> RuntimeResult<ProcessRun>;

    /// Subscribe to server-ready events.
    ///
    /// Only events sent after subscribing are received.
    fn server_ready(&self) -> broadcast::Receiver<ServerReady>;

    /// Release the sandbox. Safe to call more than once.
    async fn teardown(&self);
}

/// A runtime shared between sessions.
pub type SharedRuntime = Arc<dyn SandboxRuntime>;

/// A sandbox handle shared between a session and its stage tasks.
pub type SharedHandle = Arc<dyn SandboxHandle>;

/// Render a command and its arguments as one line.
pub fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_command_line() {
        assert_eq!(command_line("npm", &["install".to_string()]), "npm install");
        assert_eq!(
            command_line("npm", &["run".to_string(), "dev".to_string()]),
            "npm run dev"
        );
        assert_eq!(command_line("make", &[]), "make");
    }

    #[tokio::test]
    async fn test_process_run_parts() {
        let output = futures::stream::iter(vec!["a".to_string(), "b".to_string()]).boxed();
        let exit: ExitFuture = Box::pin(async { Ok(3) });
        let run = ProcessRun::new("true", output, exit);
        assert_eq!(run.command(), "true");
        assert!(format!("{:?}", run).contains("true"));

        let (output, exit) = run.into_parts();
        let chunks: Vec<String> = output.collect().await;
        assert_eq!(chunks, vec!["a", "b"]);
        assert_eq!(exit.await.unwrap(), 3);
    }
}
