//! Config file discovery.
//!
//! Two layers are read, the later replacing whole sections of the earlier:
//! 1. `config.toml` in the user config directory (`$SANDHOST_CONFIG_DIR`, or
//!    `~/.config/sandhost` on Linux)
//! 2. `sandhost.toml` in the project directory
//!
//! CLI flags are applied on top by the binary.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, SandhostConfig};

const APP_NAME: &str = "sandhost";
const USER_CONFIG_FILE: &str = "config.toml";
const PROJECT_CONFIG_FILE: &str = "sandhost.toml";
const CONFIG_DIR_ENV: &str = "SANDHOST_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Per-user defaults.
    User,
    /// Settings checked in next to a project.
    Project,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLayer::User => f.write_str("user"),
            ConfigLayer::Project => f.write_str("project"),
        }
    }
}

/// A config file that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: ConfigLayer,
    pub path: PathBuf,
    /// False when the file is missing or could not be parsed.
    pub loaded: bool,
}

/// The merged configuration and how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SandhostConfig,
    /// Every file checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Problems that did not stop loading.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that contributed to the config.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover and merge the user and project config files.
///
/// `project_dir` defaults to the current directory.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], reading the user layer from `config_dir` instead
/// of [`user_config_dir`].
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_dir = config_dir.map(Path::to_path_buf).or_else(user_config_dir);
    let project_dir = project_dir.map_or_else(PathBuf::new, Path::to_path_buf);

    let mut layers = Vec::with_capacity(2);
    if let Some(dir) = user_dir {
        layers.push((ConfigLayer::User, dir.join(USER_CONFIG_FILE)));
    }
    layers.push((ConfigLayer::Project, project_dir.join(PROJECT_CONFIG_FILE)));

    let mut loaded = LoadedConfig {
        config: SandhostConfig::new(),
        sources: Vec::with_capacity(layers.len()),
        warnings: Vec::new(),
    };

    for (layer, path) in layers {
        let ok = match read_layer(&path) {
            Ok(Some(config)) => {
                loaded.config.merge(config);
                true
            }
            Ok(None) => false,
            Err(e) => {
                loaded
                    .warnings
                    .push(format!("Ignoring {layer} config {}: {e}", path.display()));
                false
            }
        };
        loaded.sources.push(ConfigSource {
            layer,
            path,
            loaded: ok,
        });
    }

    if loaded.config.runtime.is_some() && loaded.config.runtime().root.is_none() {
        loaded.warnings.push(format!(
            "[runtime] has no root; sessions go to {}",
            std::env::temp_dir().join(APP_NAME).display()
        ));
    }

    Ok(loaded)
}

/// Read one config file, with no discovery.
pub fn load_config_file(path: &Path) -> Result<SandhostConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SandhostConfig::from_toml(&contents)
}

/// The user config directory: `$SANDHOST_CONFIG_DIR` when set, otherwise
/// `sandhost` under the platform config directory.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

/// `Ok(None)` when the file does not exist.
fn read_layer(path: &Path) -> Result<Option<SandhostConfig>> {
    if !path.is_file() {
        return Ok(None);
    }
    load_config_file(path).map(Some)
}
