use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use serde::Serialize;

use super::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Result of pushing one frame to a set of connections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub delivered: usize,
    /// Connections whose writer is gone
    pub failed: Vec<ConnectionId>,
}

/// Encode `payload` once and push it to each target.
fn send_all<T: Serialize>(targets: &[ConnectionHandle], payload: &T) -> SendOutcome {
    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound frame");
            return SendOutcome::default();
        }
    };
    let msg = Message::Text(text.into());

    let mut outcome = SendOutcome::default();
    for target in targets {
        match target.send(msg.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(_) => outcome.failed.push(target.id()),
        }
    }
    outcome
}

/// Broadcast a JSON frame to every registered connection.
pub fn broadcast_to_all<T: Serialize>(registry: &ConnectionRegistry, payload: &T) -> SendOutcome {
    send_all(&registry.all(), payload)
}

/// Send a JSON frame to a specific user (all their connections).
pub fn send_to_user<T: Serialize>(
    registry: &ConnectionRegistry,
    user_id: &str,
    payload: &T,
) -> SendOutcome {
    send_all(&registry.find(user_id), payload)
}

/// Queue a Close frame; the writer task forwards it and the peer sees the code.
pub fn close_connection(handle: &ConnectionHandle, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    let _ = handle.send(Message::Close(Some(frame)));
}
