//! HTTP routes.

mod health;
mod ws;

pub use health::{HealthResponse, health, health_routes};
pub use ws::{ConnectionId, ws_handler};
