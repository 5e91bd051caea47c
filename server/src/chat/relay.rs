//! Message Relay: inbound chat event → validate → persist → fan out.
//!
//! Delivery is fire-and-forget. Persistence happens first; only a message the
//! store accepted is pushed, and only to the recipient's live connections.
//! The sender gets no echo and no error frame.

use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::chat::messages::{MessageStore, NewMessage, StoredMessage};
use crate::chat::presence;
use crate::error::ChatError;
use crate::uploads::store::BlobStore;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::{ChatPush, InboundMessage};
use crate::ws::ConnectionRegistry;

/// Maximum message text length (chars).
const MAX_TEXT_LENGTH: usize = 4000;

/// What happened to one relayed message.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message: StoredMessage,
    /// Recipient connections the push was queued on
    pub delivered: usize,
    /// Recipient connections found dead during fan-out
    pub failed: usize,
}

#[derive(Clone)]
pub struct MessageRelay {
    registry: ConnectionRegistry,
    messages: Arc<dyn MessageStore>,
    blobs: Arc<dyn BlobStore>,
}

impl MessageRelay {
    pub fn new(
        registry: ConnectionRegistry,
        messages: Arc<dyn MessageStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            registry,
            messages,
            blobs,
        }
    }

    /// Process one chat event from `sender`.
    ///
    /// Errors mean nothing was delivered; callers log them and carry on.
    pub async fn handle_inbound(
        &self,
        sender: &Identity,
        inbound: InboundMessage,
    ) -> Result<DeliveryReport, ChatError> {
        let recipient = validate_recipient(&inbound.recipient)?;

        let text = inbound.text().map(str::to_string);
        if text.is_none() && inbound.attachment.is_none() {
            return Err(ChatError::Validation(
                "Message needs text or an attachment".to_string(),
            ));
        }
        if let Some(text) = &text {
            if text.chars().count() > MAX_TEXT_LENGTH {
                return Err(ChatError::Validation(format!(
                    "Message text exceeds {} characters",
                    MAX_TEXT_LENGTH
                )));
            }
        }

        // Attachment bytes go to the blob store; only the reference travels on
        let attachment_ref = match &inbound.attachment {
            Some(attachment) => {
                let data = attachment.decode()?;
                let extension = attachment.extension_hint().to_string();
                let blobs = self.blobs.clone();
                Some(tokio::task::spawn_blocking(move || blobs.save(&data, &extension)).await??)
            }
            None => None,
        };

        let new_message = NewMessage {
            sender: sender.user_id.clone(),
            recipient,
            text,
            attachment_ref: attachment_ref.clone(),
        };
        let store = self.messages.clone();
        let appended = tokio::task::spawn_blocking(move || store.append(new_message)).await?;
        let message = match appended {
            Ok(message) => message,
            Err(e) => {
                if let Some(reference) = attachment_ref {
                    self.discard_blob(reference).await;
                }
                return Err(e);
            }
        };

        tracing::debug!(
            message_id = %message.id,
            sender = %message.sender,
            recipient = %message.recipient,
            "Message persisted"
        );

        let outcome = send_to_user(&self.registry, &message.recipient, &ChatPush::from(&message));

        // A connection we cannot write to is dead
        for id in &outcome.failed {
            tracing::warn!(
                connection_id = *id,
                recipient = %message.recipient,
                "Push failed, dropping recipient connection"
            );
            presence::connection_left(&self.registry, *id);
        }

        Ok(DeliveryReport {
            message,
            delivered: outcome.delivered,
            failed: outcome.failed.len(),
        })
    }

    /// Remove an attachment whose message was never stored.
    async fn discard_blob(&self, reference: String) {
        let blobs = self.blobs.clone();
        let name = reference.clone();
        let removed = tokio::task::spawn_blocking(move || blobs.remove(&name))
            .await
            .map_err(ChatError::from)
            .and_then(|result| result);
        match removed {
            Ok(()) => {
                tracing::debug!(attachment = %reference, "Discarded unreferenced attachment");
            }
            Err(e) => {
                tracing::warn!(
                    attachment = %reference,
                    error = %e,
                    "Orphaned attachment left in uploads"
                );
            }
        }
    }
}

/// Recipient ids are UUIDs issued at registration.
fn validate_recipient(recipient: &str) -> Result<String, ChatError> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Err(ChatError::Validation("Missing recipient".to_string()));
    }
    Uuid::parse_str(recipient)
        .map(|_| recipient.to_string())
        .map_err(|_| ChatError::Validation(format!("Invalid recipient id: {}", recipient)))
}
