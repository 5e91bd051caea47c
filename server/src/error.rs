//! Error taxonomy shared by the REST handlers and the connection actors.
//!
//! REST handlers return `ChatError` directly (it implements `IntoResponse`).
//! Inside a WebSocket actor errors are logged at the connection boundary and
//! never surfaced to other connections.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Missing, malformed, forged or expired session token.
    #[error("invalid session token")]
    InvalidToken,

    /// Expired session token (kept apart so the WS handshake can pick its close code).
    #[error("session token expired")]
    TokenExpired,

    /// Wrong username/password.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed recipient, empty payload, undecodable attachment.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Message store write or read failure.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Blob store failure.
    #[error("storage failed: {0}")]
    Storage(String),

    /// Failed to push a frame to a specific connection.
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken | Self::TokenExpired | Self::Authentication(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Persistence(_) | Self::Storage(_) | Self::Transport(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task join: {}", e))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the log, not in the response body
        let message = match &self {
            Self::Persistence(_) | Self::Storage(_) | Self::Transport(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
