//! Message addressing.

use std::fmt;

use serde_json::Value;

use crate::message::OutboundMessage;

/// Who an outbound message may be delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOrigin {
    /// Any origin (`*`). Only used before the parent's origin is known.
    Any,
    /// Exactly this origin.
    Exact(String),
}

impl TargetOrigin {
    /// Whether a peer with `origin` may receive a message with this target.
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            TargetOrigin::Any => true,
            TargetOrigin::Exact(expected) => expected == origin,
        }
    }

    /// Whether this is the wildcard target.
    pub fn is_any(&self) -> bool {
        matches!(self, TargetOrigin::Any)
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOrigin::Any => f.write_str("*"),
            TargetOrigin::Exact(origin) => f.write_str(origin),
        }
    }
}

/// A raw message received from the parent, with the origin it came from.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Origin of the sender. Not checked against any allow-list.
    pub origin: String,
    /// The message data exactly as received.
    pub data: Value,
}

impl InboundEnvelope {
    /// Create an envelope.
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// A message the host wants delivered to the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    /// Where the message may go.
    pub target: TargetOrigin,
    /// The message itself.
    pub message: OutboundMessage,
}

impl OutboundEnvelope {
    /// Address `message` to any origin.
    pub fn broadcast(message: OutboundMessage) -> Self {
        Self {
            target: TargetOrigin::Any,
            message,
        }
    }

    /// Address `message` to one origin.
    pub fn to(origin: impl Into<String>, message: OutboundMessage) -> Self {
        Self {
            target: TargetOrigin::Exact(origin.into()),
            message,
        }
    }
}
