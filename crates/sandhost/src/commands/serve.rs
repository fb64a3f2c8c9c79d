//! Serve command - run the WebSocket host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use sandhost_runtime::LocalRuntime;
use sandhost_server::{AppState, Server, ServerConfig};

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides [server].bind)
    #[arg(short, long, env = "SANDHOST_BIND")]
    pub bind: Option<SocketAddr>,

    /// Parent directory for session working directories
    #[arg(long)]
    pub root: Option<PathBuf>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    ctx.config.validate()?;

    let section = ctx.config.server();
    let bind = match args.bind {
        Some(addr) => addr,
        None => section.bind_address()?,
    };

    let runtime_config = ctx.runtime_config(args.root.as_deref());
    tracing::info!(root = %runtime_config.root.display(), "Session directories");
    let runtime = LocalRuntime::new(runtime_config);

    let server_config = ServerConfig::new()
        .with_bind_address(bind)
        .with_max_message_size(section.max_message_size);
    let state = AppState::new(Arc::new(runtime), ctx.pipeline(), server_config);
    let server = Server::from_state(state);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
