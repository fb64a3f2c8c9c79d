//! Inbound and outbound message types.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;
use crate::types::{CorrelationId, FileTree};

/// Wire values of the `type` field.
pub mod kinds {
    /// Host finished booting.
    pub const READY: &str = "ready";
    /// Mount request, and its acknowledgment.
    pub const MOUNT_FILES: &str = "MOUNT_FILES";
    /// Correlated failure.
    pub const ERROR: &str = "ERROR";
    /// Live preview address.
    pub const SERVER_URL: &str = "SERVER_URL";
}

/// A message received from the parent, after decoding.
///
/// Decoding never fails on well-formed JSON: anything the host does not
/// understand becomes [`InboundMessage::Unrecognized`] and is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Mount a file tree and run the install/serve pipeline.
    MountFiles {
        /// Correlation id to echo, if the parent expects a response.
        id: Option<CorrelationId>,
        /// Files to mount, passed to the runtime untouched.
        files: FileTree,
    },
    /// A known message type with an unusable payload.
    Malformed {
        /// Correlation id to echo.
        id: Option<CorrelationId>,
        /// The message type.
        kind: String,
        /// What was wrong.
        reason: String,
    },
    /// Unknown type, missing type, or non-object data.
    Unrecognized {
        /// The type, when one was present.
        kind: Option<String>,
    },
}

impl InboundMessage {
    /// Decode raw message data.
    pub fn decode(data: &Value) -> Self {
        let Some(object) = data.as_object() else {
            return Self::Unrecognized { kind: None };
        };

        let id = object
            .get("id")
            .filter(|v| !v.is_null())
            .cloned()
            .map(CorrelationId::new);

        match object.get("type").and_then(Value::as_str) {
            Some(kinds::MOUNT_FILES) => {
                match object.get("payload").and_then(|p| p.get("files")) {
                    Some(files) if !files.is_null() => Self::MountFiles {
                        id,
                        files: FileTree::new(files.clone()),
                    },
                    _ => Self::Malformed {
                        id,
                        kind: kinds::MOUNT_FILES.to_string(),
                        reason: "missing payload.files".to_string(),
                    },
                }
            }
            other => Self::Unrecognized {
                kind: other.map(str::to_string),
            },
        }
    }

    /// Decode a JSON text frame.
    pub fn decode_str(text: &str) -> Result<Self> {
        let data: Value = serde_json::from_str(text)?;
        Ok(Self::decode(&data))
    }

    /// Build the raw data of a mount request, as a parent would send it.
    pub fn mount_request(id: impl Into<CorrelationId>, files: FileTree) -> Value {
        let id: CorrelationId = id.into();
        json!({
            "type": kinds::MOUNT_FILES,
            "payload": { "files": files },
            "id": id,
        })
    }

    /// The correlation id, if any.
    pub fn id(&self) -> Option<&CorrelationId> {
        match self {
            Self::MountFiles { id, .. } | Self::Malformed { id, .. } => id.as_ref(),
            Self::Unrecognized { .. } => None,
        }
    }

    /// The message type, if any.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::MountFiles { .. } => Some(kinds::MOUNT_FILES),
            Self::Malformed { kind, .. } => Some(kind),
            Self::Unrecognized { kind } => kind.as_deref(),
        }
    }
}

/// Payload of an `ERROR` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error text.
    pub error: String,
}

/// Payload of a `SERVER_URL` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUrlPayload {
    /// Address of the running preview server.
    pub url: String,
}

/// Messages from the host to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// The sandbox booted. Sent once, before any request is accepted.
    #[serde(rename = "ready")]
    Ready,
    /// Mount request succeeded.
    #[serde(rename = "MOUNT_FILES")]
    MountAck {
        /// Echoed request id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CorrelationId>,
        /// Always `true`; failures are reported with `ERROR`.
        success: bool,
    },
    /// A request failed.
    #[serde(rename = "ERROR")]
    Error {
        /// Echoed request id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CorrelationId>,
        /// Error details.
        payload: ErrorPayload,
    },
    /// The preview server is reachable.
    #[serde(rename = "SERVER_URL")]
    ServerUrl {
        /// Preview address.
        payload: ServerUrlPayload,
    },
}

impl OutboundMessage {
    /// Create a `ready` notification.
    pub fn ready() -> Self {
        Self::Ready
    }

    /// Create a mount acknowledgment.
    pub fn mount_success(id: Option<CorrelationId>) -> Self {
        Self::MountAck { id, success: true }
    }

    /// Create a correlated error.
    pub fn error(id: Option<CorrelationId>, error: impl Into<String>) -> Self {
        Self::Error {
            id,
            payload: ErrorPayload {
                error: error.into(),
            },
        }
    }

    /// Create a preview address notification.
    pub fn server_url(url: impl Into<String>) -> Self {
        Self::ServerUrl {
            payload: ServerUrlPayload { url: url.into() },
        }
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => kinds::READY,
            Self::MountAck { .. } => kinds::MOUNT_FILES,
            Self::Error { .. } => kinds::ERROR,
            Self::ServerUrl { .. } => kinds::SERVER_URL,
        }
    }

    /// The echoed correlation id, if any.
    pub fn id(&self) -> Option<&CorrelationId> {
        match self {
            Self::MountAck { id, .. } | Self::Error { id, .. } => id.as_ref(),
            Self::Ready | Self::ServerUrl { .. } => None,
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
