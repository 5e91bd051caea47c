use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::chat::presence;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::heartbeat::{PongSender, PresenceMonitor};
use crate::ws::{protocol, ConnectionId};

/// How long the writer may keep flushing queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader task: owns the stream, hands pongs straight to the monitor and
///   queues text frames for the relay loop
/// - Presence monitor task: pings on a timer, deregisters on a missed pong
/// - Relay loop (this task): handles text frames one at a time, so a
///   connection's messages are persisted in the order they arrived
///
/// Pong intake never waits on relay work, so a slow upload cannot starve
/// the liveness check. The connection leaves the registry exactly once,
/// whichever side notices first: clean close, transport error, failed push
/// or missed pong.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let connection = state.connections.register(identity.clone(), tx);
    let connection_id = connection.id();
    let shutdown = connection.shutdown_token();

    let (monitor, pong_tx) =
        PresenceMonitor::new(state.connections.clone(), connection.clone(), state.heartbeat);
    let monitor_handle = monitor.spawn();

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Utf8Bytes>();
    let reader_handle = tokio::spawn(reader_task(
        ws_receiver,
        frames_tx,
        pong_tx,
        identity.clone(),
        shutdown.clone(),
    ));

    // Everyone, including the new connection, gets the updated online set
    presence::connection_joined(&state.connections);

    tracing::info!(
        user_id = %identity.user_id,
        connection_id = connection_id,
        "WebSocket actor started"
    );

    loop {
        let text = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(
                    user_id = %identity.user_id,
                    connection_id = connection_id,
                    "Connection deregistered, closing transport"
                );
                break;
            }
            // Frames queued before a close are still relayed
            text = frames_rx.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };
        handle_text_frame(&state, &identity, connection_id, text.as_str()).await;
    }

    // No-op if the monitor or the relay already removed it
    presence::connection_left(&state.connections, connection_id);

    // Deregistering cancelled the shutdown token, so reader and monitor stop
    let _ = reader_handle.await;
    if let Err(e) = monitor_handle.await {
        tracing::error!(
            connection_id = connection_id,
            error = %e,
            "Presence monitor task failed"
        );
    }

    // Drop our sender so the writer sees the channel close once it has flushed
    drop(connection);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %identity.user_id,
        connection_id = connection_id,
        "WebSocket actor stopped"
    );
}

/// Reader task: drains the WebSocket stream until close, error or shutdown.
/// Client pings are answered by the WebSocket layer itself.
async fn reader_task(
    mut ws_receiver: SplitStream<WebSocket>,
    frames_tx: mpsc::UnboundedSender<Utf8Bytes>,
    pong_tx: PongSender,
    identity: Identity,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if frames_tx.send(text).is_err() {
                        return;
                    }
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %identity.user_id,
                        bytes = data.len(),
                        "Ignoring binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %identity.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    return;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                return;
            }
            None => {
                tracing::info!(user_id = %identity.user_id, "WebSocket stream ended");
                return;
            }
        }
    }
}

/// Parse one chat event and hand it to the relay. Failures stay on this connection.
async fn handle_text_frame(
    state: &AppState,
    identity: &Identity,
    connection_id: ConnectionId,
    text: &str,
) {
    let inbound = match protocol::parse_inbound(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(
                user_id = %identity.user_id,
                connection_id = connection_id,
                error = %e,
                "Dropping unparseable frame"
            );
            return;
        }
    };

    match state.relay.handle_inbound(identity, inbound).await {
        Ok(report) => {
            tracing::debug!(
                message_id = %report.message.id,
                recipient = %report.message.recipient,
                delivered = report.delivered,
                failed = report.failed,
                "Message relayed"
            );
        }
        Err(ChatError::Validation(reason)) => {
            tracing::warn!(
                user_id = %identity.user_id,
                connection_id = connection_id,
                reason = %reason,
                "Dropping invalid chat event"
            );
        }
        Err(e) => {
            tracing::error!(
                user_id = %identity.user_id,
                connection_id = connection_id,
                error = %e,
                "Failed to relay message"
            );
        }
    }
}

/// Writer task: receives frames from the mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if is_close {
            break;
        }
    }
}
