//! Error types for protocol encoding and decoding.

/// Errors produced while reading or writing protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The raw text was not valid JSON.
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
