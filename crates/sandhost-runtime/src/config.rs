//! Local runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default interval between reachability probes of a detected server port.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for [`crate::LocalRuntime`].
///
/// Each booted sandbox gets its own working directory below `root`.
#[derive(Debug, Clone)]
pub struct LocalRuntimeConfig {
    /// Parent directory for session working directories.
    pub root: PathBuf,

    /// Remove the session directory on teardown.
    pub cleanup_on_teardown: bool,

    /// Interval between reachability probes.
    pub probe_interval: Duration,

    /// Host the reachability probe connects to. A loopback host is probed
    /// on both `127.0.0.1` and `::1`.
    pub probe_host: String,

    /// Host used when building preview URLs.
    pub preview_host: String,

    /// Extra environment variables for spawned processes.
    pub env_vars: Vec<(String, String)>,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            cleanup_on_teardown: true,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_host: "127.0.0.1".to_string(),
            preview_host: "localhost".to_string(),
            env_vars: Vec::new(),
        }
    }
}

impl LocalRuntimeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default parent directory: `<tmp>/sandhost`.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("sandhost")
    }

    /// Set the parent directory for session working directories.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Keep or remove session directories on teardown.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_on_teardown = cleanup;
        self
    }

    /// Set the probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the host the probe connects to.
    pub fn with_probe_host(mut self, host: impl Into<String>) -> Self {
        self.probe_host = host.into();
        self
    }

    /// Set the host used in preview URLs.
    pub fn with_preview_host(mut self, host: impl Into<String>) -> Self {
        self.preview_host = host.into();
        self
    }

    /// Add an environment variable.
    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}
