//! Sandbox runtime abstraction for the sandbox host.
//!
//! The host treats the sandbox as a black box with four capabilities: mount a
//! file tree, spawn named processes, report when a server inside becomes
//! reachable, and tear everything down. Those capabilities are the
//! [`SandboxRuntime`] and [`SandboxHandle`] traits.
//!
//! # Implementations
//!
//! | Runtime | Use |
//! |---------|-----|
//! | [`LocalRuntime`] | Per-session working directory and real child processes |
//! | `testing::MockRuntime` | Scripted behavior for tests (`testing` feature) |
//!
//! # Example
//!
//! ```no_run
//! use sandhost_runtime::{LocalRuntime, LocalRuntimeConfig, SandboxRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = LocalRuntime::new(LocalRuntimeConfig::default());
//!     let handle = runtime.boot().await?;
//!
//!     let mut ready = handle.server_ready();
//!     let run = handle.spawn("npm", &["run".to_string(), "dev".to_string()]).await?;
//!     let (_output, _exit) = run.into_parts();
//!
//!     let event = ready.recv().await?;
//!     println!("Preview at {}", event.url);
//!
//!     handle.teardown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod detect;
mod error;
mod local;
mod runtime;
mod tree;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::LocalRuntimeConfig;
pub use detect::DevServerDetector;
pub use error::{RuntimeError, RuntimeResult};
pub use local::{LocalHandle, LocalRuntime};
pub use runtime::{
    ExitFuture, OutputStream, ProcessRun, SandboxHandle, SandboxRuntime, ServerReady,
    SharedHandle, SharedRuntime, command_line,
};
pub use tree::{TreeEntry, flatten, write_entries};
