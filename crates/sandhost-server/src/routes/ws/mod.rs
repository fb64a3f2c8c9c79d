//! WebSocket channel between a parent page and its sandbox session.
//!
//! Each connection is one hosting page: it boots its own session, receives
//! `ready`, and exchanges protocol messages as JSON text frames until either
//! side goes away.
//!
//! - `connection` - Connection lifecycle and the message pump

mod connection;

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    http::{HeaderMap, header::ORIGIN},
    response::Response,
};

use crate::state::AppState;

pub use connection::ConnectionId;

/// Origin used when the upgrade request carries none.
pub(crate) const NULL_ORIGIN: &str = "null";

/// GET /ws - WebSocket upgrade handler.
///
/// The `Origin` header of the upgrade request becomes the origin of every
/// inbound message on the connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(NULL_ORIGIN)
        .to_string();

    ws.max_message_size(state.config().max_message_size)
        .on_upgrade(move |socket| connection::handle_socket(socket, state, origin))
}
