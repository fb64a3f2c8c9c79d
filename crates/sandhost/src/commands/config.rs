//! Config command - show the effective configuration.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print as JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    let resolved = ctx.config.resolved();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    println!("# sandhost configuration\n");
    if ctx.sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        println!("# Config files:");
        for source in &ctx.sources {
            println!("#   {}", source.display());
        }
        println!();
    }
    if let Err(e) = ctx.config.validate() {
        println!("# Warning: {}\n", e);
    }

    print!("{}", resolved.to_toml()?);
    Ok(())
}
