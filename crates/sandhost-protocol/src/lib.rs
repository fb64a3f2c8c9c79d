//! Message protocol between a sandbox host and its parent frame.
//!
//! The parent embeds the host and drives it with a handful of JSON messages.
//! This crate is a passive data contract: it decodes what the parent sends,
//! builds what the host answers, and describes who a message is addressed to.
//!
//! ```text
//!  parent                               host
//!    │  ◄──────── { type: "ready" } ─────  │   (target "*")
//!    │  ── { type: "MOUNT_FILES", id } ──► │
//!    │  ◄─ { type: "MOUNT_FILES", id,      │   (target = request origin)
//!    │       success: true }               │
//!    │  ◄─ { type: "SERVER_URL",           │
//!    │       payload: { url } } ────────── │
//! ```
//!
//! Correlation ids are opaque: the host never generates one, it only echoes
//! the id of the request that caused a response.

mod error;
mod message;
mod origin;
mod types;

pub use error::{ProtocolError, Result};
pub use message::{ErrorPayload, InboundMessage, OutboundMessage, ServerUrlPayload, kinds};
pub use origin::{InboundEnvelope, OutboundEnvelope, TargetOrigin};
pub use types::{CorrelationId, FileTree};
