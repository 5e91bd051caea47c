//! JSON wire shapes exchanged over the WebSocket.
//!
//! Client → server: `{recipient, text?, attachment?: {name, data}}`
//! Server → client: chat `{id, sender, recipient, text?, attachmentRef?}`
//! or presence `{online: [{userId, username}]}`.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::chat::messages::StoredMessage;
use crate::error::ChatError;

/// A chat event sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Older clients send this field as `file`
    #[serde(default, alias = "file")]
    pub attachment: Option<InboundAttachment>,
}

impl InboundMessage {
    /// Text with empty strings treated as absent.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Attachment uploaded inline with a chat event.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundAttachment {
    /// Original file name; only the extension is kept
    pub name: String,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL
    pub data: String,
}

impl InboundAttachment {
    /// Text after the last `.` of the file name, if any.
    pub fn extension_hint(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, ChatError> {
        let encoded = match self.data.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => self.data.as_str(),
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ChatError::Validation(format!("Attachment is not valid base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(ChatError::Validation("Attachment is empty".to_string()));
        }
        Ok(bytes)
    }
}

/// Parse a text frame into a chat event.
pub fn parse_inbound(frame: &str) -> Result<InboundMessage, ChatError> {
    serde_json::from_str(frame)
        .map_err(|e| ChatError::Validation(format!("Malformed chat event: {}", e)))
}

/// Chat message pushed to the recipient's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPush {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
}

impl From<&StoredMessage> for ChatPush {
    fn from(message: &StoredMessage) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            text: message.text.clone(),
            attachment_ref: message.attachment_ref.clone(),
        }
    }
}

/// Full online set pushed to every connection after a membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePush {
    pub online: Vec<Identity>,
}
