//! Session orchestration for the sandbox host.
//!
//! A [`SessionHost`] boots one sandbox through a [`SandboxRuntime`], announces
//! `ready` to the parent, and hands back a [`Session`]. Every inbound message
//! goes through [`Session::deliver`]; a session actor turns them, together
//! with stage completions, into state transitions:
//!
//! ```text
//! Booting ──► Ready ──MOUNT_FILES──► Mounting ──► Installing ──► Serving ──► Live
//!    │                                  │             │             │
//!    ▼                                  ▼             ▼             ▼
//! Failed(Boot)                    Failed(Mount) Failed(Install) Failed(Serve)
//! ```
//!
//! A failed pipeline can be restarted with a new `MOUNT_FILES`. A mount request
//! that arrives while a pipeline is running, or once the server is live, is
//! answered with an `ERROR`.
//!
//! [`SandboxRuntime`]: sandhost_runtime::SandboxRuntime

mod error;
mod pipeline;
mod session;
mod state;

pub use error::{HostError, HostResult};
pub use pipeline::{CommandSpec, PipelineConfig};
pub use session::{OutboundSender, Session, SessionHost};
pub use state::{FailedStage, SessionState, SessionStatus, status_text};
