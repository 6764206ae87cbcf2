//! WebSocket session lifecycle: one authenticated client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use archon_core::validation::Identity;

use super::connection::{ClientConnection, ConnectionId};
use super::membership::Gateway;
use super::protocol::{ClientCommand, parse_frame};

/// Shortest ping interval a session will run with.
pub const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Heartbeat timing for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is considered dead.
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

/// Disconnects its connection when dropped, whatever ended the session.
struct DisconnectGuard {
    gateway: Arc<Gateway>,
    id: ConnectionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let _ = self.gateway.disconnect(self.id);
    }
}

/// Apply one inbound text frame. Malformed frames are ignored.
pub fn handle_frame(gateway: &Gateway, connection: &ClientConnection, text: &str) {
    match parse_frame(text) {
        Ok(ClientCommand::Join(room)) => {
            let _ = gateway.join(connection.id, &room);
        }
        Ok(ClientCommand::Leave(room)) => {
            let _ = gateway.leave(connection.id, &room);
        }
        Err(e) => {
            debug!(conn_id = %connection.id, error = %e, "ignoring malformed event");
        }
    }
}

/// Run a WebSocket session for an authenticated identity.
///
/// 1. Registers the connection (announcing `user:join` to everyone)
/// 2. Applies inbound `project_join` / `project_leave` frames
/// 3. Forwards queued events and sends periodic Ping frames
/// 4. Ends on close, socket error, heartbeat timeout or shutdown
/// 5. Disconnects the connection (leaving every room and announcing
///    `user:leave`) no matter how the session ended
#[instrument(skip_all, fields(user_id = %identity))]
pub async fn run_session(
    socket: WebSocket,
    identity: Identity,
    gateway: Arc<Gateway>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) {
    let (connection, send_rx) = gateway.register(identity);
    let _guard = DisconnectGuard {
        gateway: gateway.clone(),
        id: connection.id,
    };

    let (ws_tx, mut ws_rx) = socket.split();
    let mut outbound = tokio::spawn(forward_outbound(
        ws_tx,
        send_rx,
        connection.clone(),
        heartbeat,
        shutdown.clone(),
    ));

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                connection.mark_alive();
                match msg {
                    Message::Text(text) => handle_frame(&gateway, &connection, text.as_str()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_frame(&gateway, &connection, text),
                        Err(_) => {
                            debug!(conn_id = %connection.id, len = data.len(), "ignoring malformed event");
                        }
                    },
                    Message::Close(_) => {
                        info!(conn_id = %connection.id, "client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = &mut outbound => break,
            () = shutdown.cancelled() => break,
        }
    }

    if !outbound.is_finished() {
        // Give the writer a moment to flush a shutdown Close frame.
        if tokio::time::timeout(Duration::from_millis(100), &mut outbound)
            .await
            .is_err()
        {
            outbound.abort();
        }
    }
}

/// Writer half: drains the outbound queue and keeps the heartbeat.
async fn forward_outbound<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(heartbeat.ping_interval.max(MIN_PING_INTERVAL));
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.silence() > heartbeat.pong_timeout {
                    warn!(
                        conn_id = %connection.id,
                        silent_secs = connection.silence().as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
