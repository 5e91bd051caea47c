use std::sync::Arc;

use crate::chat::messages::{MessageStore, SqliteMessageStore};
use crate::chat::relay::MessageRelay;
use crate::config::{Config, HeartbeatConfig};
use crate::db::DbPool;
use crate::uploads::store::{BlobStore, FsBlobStore};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Lifetime of issued session tokens
    pub session_ttl_secs: u64,
    /// Active WebSocket connections
    pub connections: ConnectionRegistry,
    /// Chat history
    pub messages: Arc<dyn MessageStore>,
    /// Inbound chat event pipeline
    pub relay: MessageRelay,
    /// Ping/pong timing for every connection
    pub heartbeat: HeartbeatConfig,
    /// Directory served at /uploads
    pub uploads_dir: String,
    /// Origin allowed by CORS
    pub cors_origin: String,
}

impl AppState {
    /// Wire up the SQLite message store and filesystem blob store.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, config: &Config) -> Self {
        let uploads_dir = config.uploads_dir();
        let connections = ConnectionRegistry::new();
        let messages: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(db.clone()));
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&uploads_dir));
        let relay = MessageRelay::new(connections.clone(), messages.clone(), blobs);

        Self {
            db,
            jwt_secret,
            session_ttl_secs: config.session_ttl_secs,
            connections,
            messages,
            relay,
            heartbeat: config.heartbeat,
            uploads_dir,
            cors_origin: config.cors_origin.clone(),
        }
    }
}
