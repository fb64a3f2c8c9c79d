//! Error types for sandbox runtime operations.

use thiserror::Error;

/// Errors that can occur inside the sandbox runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The sandbox could not be started.
    #[error("Failed to boot sandbox: {0}")]
    Boot(String),

    /// Writing the file tree failed.
    #[error("Failed to mount files: {0}")]
    Mount(String),

    /// The file tree has a shape the runtime cannot mount.
    #[error("Invalid file tree at '{path}': {reason}")]
    InvalidTree { path: String, reason: String },

    /// A process could not be started.
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The process supervisor went away before reporting an exit code.
    #[error("Process '{0}' ended without reporting an exit code")]
    ProcessLost(String),

    /// The sandbox has already been torn down.
    #[error("Sandbox has been torn down")]
    TornDown,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// The bare error text, without the operation prefix.
    ///
    /// This is what gets reported to the parent frame.
    pub fn detail(&self) -> String {
        match self {
            RuntimeError::Boot(message) | RuntimeError::Mount(message) => message.clone(),
            RuntimeError::Spawn { message, .. } => message.clone(),
            RuntimeError::Io(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
