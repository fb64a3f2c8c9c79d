//! WebSocket channel for the sandbox host.
//!
//! A parent page connects to `GET /ws`; the connection boots one sandbox
//! session and carries the host/guest protocol as JSON frames. The
//! connection's `Origin` header is the origin of every inbound message, and
//! outbound messages are only written when their target admits it.
//!
//! # Example
//!
//! ```ignore
//! use sandhost_server::{AppState, Server, ServerConfig};
//! use sandhost_host::PipelineConfig;
//!
//! let state = AppState::new(runtime, PipelineConfig::default(), ServerConfig::default());
//! Server::from_state(state).run().await?;
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The sandbox host WebSocket server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            .merge(routes::health_routes())
            .route("/ws", get(routes::ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server on the configured address.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = self.router();
        info!(
            addr = %listener.local_addr()?,
            runtime = self.state.runtime.name(),
            "Starting server"
        );
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
