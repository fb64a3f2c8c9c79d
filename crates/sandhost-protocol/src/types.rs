//! Opaque values carried through the protocol untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation token supplied by the parent and echoed on responses.
///
/// The host treats it as an opaque JSON value: strings stay strings, numbers
/// stay numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Value);

impl CorrelationId {
    /// Wrap an arbitrary JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The raw value as received.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(Value::String(id))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// A project file tree as sent by the parent.
///
/// Kept as raw JSON: the host hands it to the sandbox runtime unmodified and
/// the runtime decides whether its structure is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree(Value);

impl FileTree {
    /// Wrap a JSON value as a file tree.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The raw tree.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the tree and return the raw value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Number of top-level entries, if the tree is an object.
    pub fn top_level_len(&self) -> Option<usize> {
        self.0.as_object().map(|m| m.len())
    }
}

impl From<Value> for FileTree {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
