//! Orchestrator error types.

use sandhost_runtime::RuntimeError;

/// Result type alias for orchestrator operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Errors surfaced to the code that owns a session.
///
/// Pipeline failures are not errors here: they are reported to the parent
/// as protocol messages and reflected in the session status.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The sandbox could not be booted.
    #[error("Boot failed: {0}")]
    Boot(#[source] RuntimeError),

    /// The session was torn down.
    #[error("Session closed")]
    Closed,
}

impl HostError {
    /// The message shown in the status line.
    pub fn detail(&self) -> String {
        match self {
            HostError::Boot(e) => e.detail(),
            HostError::Closed => self.to_string(),
        }
    }
}
