//! Application state shared across handlers.

use std::sync::Arc;

use sandhost_host::PipelineConfig;
use sandhost_runtime::SharedRuntime;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime every connection boots its sandbox from.
    pub runtime: SharedRuntime,

    /// Pipeline each session runs after a mount.
    pub pipeline: Arc<PipelineConfig>,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(runtime: SharedRuntime, pipeline: PipelineConfig, config: ServerConfig) -> Self {
        Self {
            runtime,
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
