//! Run command - mount a local project and run its pipeline once.
//!
//! Every outbound protocol message is printed to stdout as one JSON line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use sandhost_host::SessionHost;
use sandhost_protocol::{FileTree, InboundEnvelope, InboundMessage, OutboundEnvelope};
use sandhost_runtime::LocalRuntime;

use super::Context;

/// Origin of messages sent by the CLI.
const CLI_ORIGIN: &str = "cli";

/// Correlation id of the CLI's mount request.
const MOUNT_ID: &str = "cli";

/// Directories never copied into the sandbox.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Project directory to mount
    pub dir: PathBuf,

    /// Parent directory for session working directories
    #[arg(long)]
    pub root: Option<PathBuf>,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    ctx.config.validate()?;

    let files = read_tree(&args.dir)
        .with_context(|| format!("Failed to read project {}", args.dir.display()))?;
    tracing::info!(
        dir = %args.dir.display(),
        entries = files.top_level_len().unwrap_or(0),
        "Read project"
    );

    let runtime = LocalRuntime::new(ctx.runtime_config(args.root.as_deref()));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let host = SessionHost::new(Arc::new(runtime), ctx.pipeline(), outbound_tx);
    let mut status = host.status();

    let session = host.boot().await?;
    session.deliver(InboundEnvelope::new(
        CLI_ORIGIN,
        InboundMessage::mount_request(MOUNT_ID, files),
    ))?;

    let mut failure = None;
    loop {
        tokio::select! {
            Some(envelope) = outbound_rx.recv() => print_message(&envelope)?,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.state.is_failed() {
                    failure = Some(current.message);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Replies sent just before a failure still belong on stdout.
    while let Ok(envelope) = outbound_rx.try_recv() {
        print_message(&envelope)?;
    }

    session.teardown().await;

    match failure {
        Some(message) => bail!("Pipeline failed: {}", message),
        None => Ok(()),
    }
}

fn print_message(envelope: &OutboundEnvelope) -> Result<()> {
    println!("{}", envelope.message.to_json()?);
    Ok(())
}

/// Read a directory into a file tree, skipping `node_modules` and `.git`.
///
/// Files become `{ "file": { "contents": ... } }` and directories
/// `{ "directory": { ... } }`. Files that are not UTF-8 are skipped.
pub fn read_tree(dir: &Path) -> Result<FileTree> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(FileTree::new(Value::Object(read_dir(dir)?)))
}

fn read_dir(dir: &Path) -> Result<Map<String, Value>> {
    let mut map = Map::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            map.insert(name, json!({ "directory": read_dir(&path)? }));
        } else if file_type.is_file() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => {
                    map.insert(name, json!({ "file": { "contents": contents } }));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                }
            }
        }
    }

    Ok(map)
}
