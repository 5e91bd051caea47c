//! WebSocket transport and the Connection Registry.
//!
//! Every live WebSocket is registered here with the identity it authenticated
//! as. A user can hold several connections at once (devices/tabs); the
//! registry never deduplicates them.

pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod heartbeat;
pub mod protocol;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::error::ChatError;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system clone this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Registry-assigned connection identifier, unique for the process lifetime.
pub type ConnectionId = u64;

/// A registered connection: identity plus the means to reach and stop it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    sender: ConnectionSender,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Cancelled once the connection leaves the registry.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, msg: Message) -> Result<(), ChatError> {
        self.sender
            .send(msg)
            .map_err(|_| ChatError::Transport(format!("connection {} is closed", self.id)))
    }
}

/// Connection registry: tracks all active WebSocket connections.
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `identity`. Existing connections of the same user are kept.
    pub fn register(&self, identity: Identity, sender: ConnectionSender) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ConnectionHandle {
            id,
            identity,
            sender,
            shutdown: CancellationToken::new(),
        };
        self.connections.insert(id, handle.clone());

        tracing::debug!(
            connection_id = id,
            user_id = %handle.identity.user_id,
            connections = self.connections.len(),
            "Connection registered"
        );
        handle
    }

    /// Remove a connection and cancel its shutdown token.
    /// Returns the handle only for the call that actually removed it.
    pub fn deregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let (_, handle) = self.connections.remove(&id)?;
        handle.shutdown.cancel();

        tracing::debug!(
            connection_id = id,
            user_id = %handle.identity.user_id,
            connections = self.connections.len(),
            "Connection deregistered"
        );
        Some(handle)
    }

    /// Distinct identities with at least one live connection,
    /// ordered by username then user id.
    pub fn snapshot(&self) -> Vec<Identity> {
        let mut unique: HashMap<String, Identity> = HashMap::new();
        for entry in self.connections.iter() {
            let identity = &entry.value().identity;
            unique
                .entry(identity.user_id.clone())
                .or_insert_with(|| identity.clone());
        }

        let mut online: Vec<Identity> = unique.into_values().collect();
        online.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        online
    }

    /// Every live connection of `user_id`.
    pub fn find(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .filter(|entry| entry.value().identity.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Every live connection.
    pub fn all(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
