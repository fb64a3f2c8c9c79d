//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [pipeline]
//! report_install_failure = false
//! install = { command = "npm", args = ["install"] }
//! serve = { command = "npm", args = ["run", "dev"] }
//!
//! [runtime]
//! root = "/tmp/sandhost"
//! cleanup_on_teardown = true
//! probe_interval_ms = 250
//!
//! [server]
//! bind = "127.0.0.1:4800"
//!
//! [logging]
//! file = true
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default address of the WebSocket channel.
pub const DEFAULT_BIND: &str = "127.0.0.1:4800";

/// Default maximum size of one inbound WebSocket message (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default reachability probe interval in milliseconds.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 250;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. A section present in a later layer
/// replaces the whole section of an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandhostConfig {
    /// Install/serve pipeline.
    pub pipeline: Option<PipelineSection>,

    /// Local runtime.
    pub runtime: Option<RuntimeSection>,

    /// WebSocket channel.
    pub server: Option<ServerSection>,

    /// Log output.
    pub logging: Option<LoggingSection>,
}

impl SandhostConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: SandhostConfig) {
        if other.pipeline.is_some() {
            self.pipeline = other.pipeline;
        }
        if other.runtime.is_some() {
            self.runtime = other.runtime;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Pipeline section, or defaults.
    pub fn pipeline(&self) -> PipelineSection {
        self.pipeline.clone().unwrap_or_default()
    }

    /// Runtime section, or defaults.
    pub fn runtime(&self) -> RuntimeSection {
        self.runtime.clone().unwrap_or_default()
    }

    /// Server section, or defaults.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// Logging section, or defaults.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Fill every section with its effective value.
    pub fn resolved(&self) -> Self {
        Self {
            pipeline: Some(self.pipeline()),
            runtime: Some(self.runtime()),
            server: Some(self.server()),
            logging: Some(self.logging()),
        }
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let pipeline = self.pipeline();
        pipeline.install.validate("pipeline.install")?;
        pipeline.serve.validate("pipeline.serve")?;

        let runtime = self.runtime();
        if runtime.probe_interval_ms == 0 {
            return Err(invalid("runtime.probe_interval_ms", "must be greater than zero"));
        }
        if runtime.probe_host.trim().is_empty() {
            return Err(invalid("runtime.probe_host", "must not be empty"));
        }

        let server = self.server();
        server.bind_address()?;
        if server.max_message_size == 0 {
            return Err(invalid("server.max_message_size", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// A command with its argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSection {
    /// Executable name.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSection {
    /// Create a command section.
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(invalid(&format!("{field}.command"), "must not be empty"));
        }
        Ok(())
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Report a failed dependency install to the parent as an `ERROR`.
    pub report_install_failure: bool,
    /// Dependency installation command.
    pub install: CommandSection,
    /// Long-running server command.
    pub serve: CommandSection,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            report_install_failure: false,
            install: CommandSection::new("npm", &["install"]),
            serve: CommandSection::new("npm", &["run", "dev"]),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// `[runtime]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Parent directory for session working directories. Defaults to the
    /// system temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Remove session directories on teardown.
    pub cleanup_on_teardown: bool,
    /// Interval between reachability probes.
    pub probe_interval_ms: u64,
    /// Host the reachability probe connects to.
    pub probe_host: String,
    /// Host used in preview URLs.
    pub preview_host: String,
    /// Extra environment for spawned processes.
    pub env: BTreeMap<String, String>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            root: None,
            cleanup_on_teardown: true,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            probe_host: "127.0.0.1".to_string(),
            preview_host: "localhost".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl RuntimeSection {
    /// Probe interval as a duration.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address the WebSocket channel listens on.
    pub bind: String,
    /// Maximum size of one inbound message in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerSection {
    /// Parse the bind address.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.bind.parse().map_err(|e| ConfigError::Invalid {
            field: "server.bind".to_string(),
            reason: format!("'{}': {}", self.bind, e),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console filter directive (e.g. `"sandhost=debug,info"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Also write JSON logs to a daily rolling file.
    pub file: bool,
    /// Directory for log files. Defaults to `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: None,
            file: true,
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SandhostConfig::from_toml("").unwrap();
        assert_eq!(config, SandhostConfig::default());

        let pipeline = config.pipeline();
        assert_eq!(pipeline.install, CommandSection::new("npm", &["install"]));
        assert_eq!(pipeline.serve, CommandSection::new("npm", &["run", "dev"]));
        assert!(!pipeline.report_install_failure);

        assert_eq!(config.server().bind, DEFAULT_BIND);
        assert_eq!(
            config.runtime().probe_interval(),
            Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[pipeline]
report_install_failure = true
install = { command = "pnpm", args = ["install", "--frozen-lockfile"] }
serve = { command = "pnpm", args = ["dev"] }

[runtime]
root = "/srv/sandhost"
cleanup_on_teardown = false
probe_interval_ms = 100
preview_host = "preview.internal"

[runtime.env]
NODE_ENV = "development"

[server]
bind = "0.0.0.0:9000"
max_message_size = 1024

[logging]
filter = "sandhost=trace"
file = false
"#;
        let config = SandhostConfig::from_toml(toml).unwrap();

        let pipeline = config.pipeline();
        assert!(pipeline.report_install_failure);
        assert_eq!(pipeline.install.args, vec!["install", "--frozen-lockfile"]);
        assert_eq!(pipeline.serve.command, "pnpm");

        let runtime = config.runtime();
        assert_eq!(runtime.root, Some(PathBuf::from("/srv/sandhost")));
        assert!(!runtime.cleanup_on_teardown);
        assert_eq!(runtime.probe_interval_ms, 100);
        assert_eq!(runtime.probe_host, "127.0.0.1");
        assert_eq!(runtime.preview_host, "preview.internal");
        assert_eq!(runtime.env.get("NODE_ENV").map(String::as_str), Some("development"));

        let server = config.server();
        assert_eq!(server.bind_address().unwrap().port(), 9000);
        assert_eq!(server.max_message_size, 1024);

        let logging = config.logging();
        assert_eq!(logging.filter.as_deref(), Some("sandhost=trace"));
        assert!(!logging.file);
    }

    #[test]
    fn test_command_args_default_to_empty() {
        let config = SandhostConfig::from_toml(
            r#"
[pipeline]
serve = { command = "./serve.sh" }
"#,
        )
        .unwrap();
        let pipeline = config.pipeline();
        assert!(pipeline.serve.args.is_empty());
        // Missing keys inside a present section take their defaults.
        assert_eq!(pipeline.install, CommandSection::new("npm", &["install"]));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = SandhostConfig::from_toml(
            r#"
[server]
bind = "127.0.0.1:1000"

[runtime]
probe_interval_ms = 10
"#,
        )
        .unwrap();

        let overlay = SandhostConfig::from_toml(
            r#"
[server]
bind = "127.0.0.1:2000"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.server().bind, "127.0.0.1:2000");
        assert_eq!(base.runtime().probe_interval_ms, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SandhostConfig::from_toml("[server]\nbind = \"not an address\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.bind"));

        let config =
            SandhostConfig::from_toml("[pipeline]\ninstall = { command = \"\" }").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.install.command"));

        let config = SandhostConfig::from_toml("[runtime]\nprobe_interval_ms = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = SandhostConfig::from_toml("[pipeline\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_resolved_round_trips_through_toml() {
        let resolved = SandhostConfig::new().resolved();
        let text = resolved.to_toml().unwrap();
        assert!(text.contains("[pipeline]"));
        assert!(text.contains("npm"));
        assert_eq!(SandhostConfig::from_toml(&text).unwrap(), resolved);
    }
}
