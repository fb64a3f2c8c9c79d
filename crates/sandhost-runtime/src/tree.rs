//! Turning a protocol file tree into filesystem entries.
//!
//! Accepted node shapes:
//!
//! ```text
//! "name": "text"                                  file
//! "name": { "file": { "contents": "text" } }      file
//! "name": { "directory": { ... } }                directory
//! "name": { ... }                                 directory (bare mapping)
//! ```

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use sandhost_protocol::FileTree;

use crate::error::{RuntimeError, RuntimeResult};

/// One filesystem entry produced from a file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// A directory, relative to the mount root.
    Directory(PathBuf),
    /// A file, relative to the mount root.
    File { path: PathBuf, contents: String },
}

impl TreeEntry {
    /// Relative path of the entry.
    pub fn path(&self) -> &Path {
        match self {
            TreeEntry::Directory(path) => path,
            TreeEntry::File { path, .. } => path,
        }
    }
}

/// Flatten a file tree into entries, parents before children.
pub fn flatten(tree: &FileTree) -> RuntimeResult<Vec<TreeEntry>> {
    let root = tree.as_value().as_object().ok_or_else(|| RuntimeError::InvalidTree {
        path: String::new(),
        reason: "file tree must be an object".to_string(),
    })?;

    let mut entries = Vec::new();
    walk(root, Path::new(""), &mut entries)?;
    Ok(entries)
}

fn walk(map: &Map<String, Value>, prefix: &Path, out: &mut Vec<TreeEntry>) -> RuntimeResult<()> {
    for (name, node) in map {
        let path = prefix.join(name);
        validate_segment(name, &path)?;

        match node {
            Value::String(contents) => out.push(TreeEntry::File {
                path,
                contents: contents.clone(),
            }),
            Value::Object(object) => {
                if object.len() == 1 {
                    if let Some(Value::Object(file)) = object.get("file") {
                        let contents = file
                            .get("contents")
                            .and_then(Value::as_str)
                            .ok_or_else(|| invalid(&path, "file entry needs string contents"))?;
                        out.push(TreeEntry::File {
                            path,
                            contents: contents.to_string(),
                        });
                        continue;
                    }
                    if let Some(Value::Object(directory)) = object.get("directory") {
                        out.push(TreeEntry::Directory(path.clone()));
                        walk(directory, &path, out)?;
                        continue;
                    }
                }
                out.push(TreeEntry::Directory(path.clone()));
                walk(object, &path, out)?;
            }
            other => {
                return Err(invalid(
                    &path,
                    &format!("unsupported node type: {}", value_kind(other)),
                ));
            }
        }
    }
    Ok(())
}

fn validate_segment(name: &str, path: &Path) -> RuntimeResult<()> {
    if name.is_empty() {
        return Err(invalid(path, "empty path segment"));
    }
    if name == "." || name == ".." {
        return Err(invalid(path, "relative path segment"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(invalid(path, "path separator in segment"));
    }
    Ok(())
}

fn invalid(path: &Path, reason: &str) -> RuntimeError {
    RuntimeError::InvalidTree {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Write flattened entries below `root`.
pub async fn write_entries(root: &Path, entries: &[TreeEntry]) -> RuntimeResult<()> {
    for entry in entries {
        match entry {
            TreeEntry::Directory(path) => {
                tokio::fs::create_dir_all(root.join(path)).await?;
            }
            TreeEntry::File { path, contents } => {
                let target = root.join(path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, contents).await?;
            }
        }
    }
    Ok(())
}
