//! Message Store: durable, append-only chat history, plus the history endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::models::MessageRow;
use crate::db::DbPool;
use crate::error::ChatError;
use crate::state::AppState;

/// A message about to be persisted. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment_ref: Option<String>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    /// RFC 3339, UTC
    pub created_at: String,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            sender: row.sender,
            recipient: row.recipient,
            text: row.text,
            attachment_ref: row.attachment_ref,
            created_at: row.created_at,
        }
    }
}

/// Durable message storage. Implementations are synchronous and must be
/// safe to call from several blocking tasks at once.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    fn append(&self, message: NewMessage) -> Result<StoredMessage, ChatError>;

    /// Every message exchanged between two users, in persistence order.
    fn query(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, ChatError>;
}

/// SQLite-backed message store sharing the server's database connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, message: NewMessage) -> Result<StoredMessage, ChatError> {
        if message.text.is_none() && message.attachment_ref.is_none() {
            return Err(ChatError::Validation(
                "Message needs text or an attachment".to_string(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        let conn = self
            .db
            .lock()
            .map_err(|e| ChatError::Persistence(format!("DB lock: {}", e)))?;
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, text, attachment_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                message.sender,
                message.recipient,
                message.text,
                message.attachment_ref,
                created_at,
            ],
        )?;

        Ok(StoredMessage {
            id,
            sender: message.sender,
            recipient: message.recipient,
            text: message.text,
            attachment_ref: message.attachment_ref,
            created_at,
        })
    }

    fn query(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, ChatError> {
        let conn = self
            .db
            .lock()
            .map_err(|e| ChatError::Persistence(format!("DB lock: {}", e)))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
             ORDER BY seq ASC",
            MessageRow::COLUMNS
        ))?;

        let messages = stmt
            .query_map(rusqlite::params![user_a, user_b], MessageRow::from_row)?
            .map(|row| row.map(StoredMessage::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

/// GET /messages/{user_id} returns the conversation between the caller and `user_id`,
/// oldest first. Session required.
pub async fn get_conversation(
    State(state): State<AppState>,
    identity: Identity,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ChatError> {
    if Uuid::parse_str(&user_id).is_err() {
        return Err(ChatError::Validation(format!("Invalid user id: {}", user_id)));
    }

    let store = state.messages.clone();
    let messages =
        tokio::task::spawn_blocking(move || store.query(&identity.user_id, &user_id)).await??;

    Ok(Json(messages))
}
