//! Presence broadcast.
//!
//! After every registry membership change the full online set is pushed to
//! every connection. Not a diff: each client always receives the whole set.

use axum::{extract::State, Json};

use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::PresencePush;
use crate::ws::{ConnectionId, ConnectionRegistry};

/// Push the current snapshot to every registered connection.
///
/// Connections that can no longer be written to are deregistered and the
/// broadcast repeats without them. Returns the number of connections reached
/// by the final round.
pub fn broadcast_presence(registry: &ConnectionRegistry) -> usize {
    loop {
        let push = PresencePush {
            online: registry.snapshot(),
        };
        let outcome = broadcast_to_all(registry, &push);

        let mut removed = false;
        for id in outcome.failed {
            if registry.deregister(id).is_some() {
                tracing::warn!(connection_id = id, "Dropping unreachable connection during presence broadcast");
                removed = true;
            }
        }

        if !removed {
            tracing::debug!(
                online = push.online.len(),
                connections = outcome.delivered,
                "Presence broadcast"
            );
            return outcome.delivered;
        }
    }
}

/// Announce a freshly registered connection.
pub fn connection_joined(registry: &ConnectionRegistry) {
    broadcast_presence(registry);
}

/// Deregister `id` and, if this call removed it, rebroadcast presence.
/// Returns whether the connection was still registered.
pub fn connection_left(registry: &ConnectionRegistry, id: ConnectionId) -> bool {
    match registry.deregister(id) {
        Some(_) => {
            broadcast_presence(registry);
            true
        }
        None => false,
    }
}

/// GET /online: current presence snapshot. Session required.
pub async fn get_online(State(state): State<AppState>, _identity: Identity) -> Json<PresencePush> {
    Json(PresencePush {
        online: state.connections.snapshot(),
    })
}
