//! WebSocket connection lifecycle.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use sandhost_host::SessionHost;
use sandhost_protocol::{InboundEnvelope, OutboundEnvelope};

use crate::state::AppState;

/// Unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle a WebSocket connection: boot a session, then pump messages both
/// ways until the socket closes.
pub async fn handle_socket(socket: WebSocket, state: AppState, origin: String) {
    let id = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    tracing::debug!(connection_id = %id, %origin, "WebSocket connection established");

    let host = SessionHost::new(
        Arc::clone(&state.runtime),
        (*state.pipeline).clone(),
        outbound_tx,
    );
    let session = match host.boot().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(connection_id = %id, error = %e, "Closing connection, sandbox did not boot");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            Some(envelope) = outbound_rx.recv() => {
                if send_envelope(&mut sender, &origin, envelope).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                // Text and Binary frames both carry JSON; Binary must be UTF-8.
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(connection_id = %id, "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %id, "WebSocket error: {}", e);
                        break;
                    }
                };

                let data: Value = match serde_json::from_str(&text) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::debug!(connection_id = %id, error = %e, "Ignoring non-JSON frame");
                        continue;
                    }
                };

                if session.deliver(InboundEnvelope::new(origin.clone(), data)).is_err() {
                    break;
                }
            }
        }
    }

    session.teardown().await;
    tracing::debug!(connection_id = %id, "WebSocket connection closed");
}

/// Write one outbound message if its target admits this connection's origin.
async fn send_envelope(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    origin: &str,
    envelope: OutboundEnvelope,
) -> Result<(), axum::Error> {
    if !envelope.target.matches(origin) {
        tracing::debug!(
            target_origin = %envelope.target,
            %origin,
            kind = envelope.message.kind(),
            "Dropping message for another origin"
        );
        return Ok(());
    }

    let json = envelope.message.to_json().map_err(axum::Error::new)?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
