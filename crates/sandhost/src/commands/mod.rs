//! CLI command handlers.

pub mod config;
pub mod run;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::Result;

use sandhost_config::SandhostConfig;
use sandhost_host::{CommandSpec, PipelineConfig};
use sandhost_runtime::LocalRuntimeConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: SandhostConfig,
    /// Config files that were loaded, lowest precedence first.
    pub sources: Vec<PathBuf>,
    /// Problems found while loading config files.
    pub warnings: Vec<String>,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load configuration: an explicit file if given, otherwise the user
    /// config directory and `./sandhost.toml`.
    pub fn load(explicit: Option<&Path>, verbose: bool) -> Result<Self> {
        if let Some(path) = explicit {
            let config = sandhost_config::load_config_file(path)?;
            return Ok(Self {
                config,
                sources: vec![path.to_path_buf()],
                warnings: Vec::new(),
                verbose,
            });
        }

        let loaded = sandhost_config::load_config(None)?;
        let sources = loaded
            .loaded_from()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        Ok(Self {
            config: loaded.config,
            sources,
            warnings: loaded.warnings,
            verbose,
        })
    }

    /// Pipeline commands from `[pipeline]`.
    pub fn pipeline(&self) -> PipelineConfig {
        let section = self.config.pipeline();
        PipelineConfig::new()
            .with_install(CommandSpec::new(
                section.install.command,
                section.install.args,
            ))
            .with_serve(CommandSpec::new(section.serve.command, section.serve.args))
            .with_report_install_failure(section.report_install_failure)
    }

    /// Local runtime settings from `[runtime]`, with `root` overriding the
    /// configured session root.
    pub fn runtime_config(&self, root: Option<&Path>) -> LocalRuntimeConfig {
        let section = self.config.runtime();

        let mut config = LocalRuntimeConfig::new()
            .with_cleanup(section.cleanup_on_teardown)
            .with_probe_interval(section.probe_interval())
            .with_probe_host(section.probe_host.clone())
            .with_preview_host(section.preview_host.clone());

        if let Some(root) = root.map(Path::to_path_buf).or(section.root.clone()) {
            config = config.with_root(root);
        }
        for (key, value) in &section.env {
            config = config.add_env(key.clone(), value.clone());
        }
        config
    }
}
