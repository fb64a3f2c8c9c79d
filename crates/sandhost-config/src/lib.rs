//! Configuration system for the sandbox host.
//!
//! Provides TOML-based configuration with:
//! - Pipeline commands (`[pipeline.install]`, `[pipeline.serve]`)
//! - Local runtime settings (`[runtime]`)
//! - WebSocket channel settings (`[server]`)
//! - Log output settings (`[logging]`)
//!
//! Config files are layered: the user config directory first, then a
//! project-local `sandhost.toml`, then CLI flags (applied by the binary).

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, ConfigSource, LoadedConfig, load_config, load_config_file,
    load_config_with_options, user_config_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
