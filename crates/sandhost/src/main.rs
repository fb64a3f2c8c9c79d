//! sandhost - sandbox host for embedded project previews
//!
//! Main entry point for the sandhost CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{config, run, serve};
use sandhost_config::SandhostConfig;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// sandhost - boot a sandbox, mount a project, install and serve it
#[derive(Parser)]
#[command(name = "sandhost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Load this config file instead of discovering config files
    #[arg(long, global = true, env = "SANDHOST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket host; each connection gets its own sandbox
    Serve(serve::ServeArgs),

    /// Mount a local project directory and run its pipeline once
    Run(run::RunArgs),

    /// Show the effective configuration
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = commands::Context::load(cli.config.as_deref(), cli.verbose)?;
    let _guard = init_logging(&ctx.config, cli.verbose);

    for warning in &ctx.warnings {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Console (human-readable, stderr) plus an optional rotating JSON file.
///
/// Stdout is left to command output.
fn init_logging(config: &SandhostConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let logging = config.logging();
    let filter = match (&logging.filter, verbose) {
        (_, true) => "sandhost=debug,tower_http=debug,info".to_string(),
        (Some(filter), false) => filter.clone(),
        (None, false) => "sandhost=info,warn".to_string(),
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::EnvFilter::new(filter));

    if !logging.file {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let log_dir = logging
        .dir
        .or_else(|| sandhost_config::user_config_dir().map(|d| d.join("logs")))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sandhost.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new("sandhost=trace,info")),
        )
        .init();

    Some(guard)
}
