//! Message relay engine.
//!
//! The send path checks the sender's presence binding, appends a metadata
//! record (best effort), then either forwards the opaque payload to the
//! receiver's live handles or marks the record queued. Typing indicators
//! and read receipts are transient fan-out with no persistence.

use crate::error::{RelayError, Result};
use crate::models::{MessageRecord, MessageState, MessageType, ServerEvent};
use crate::state::AppState;
use sha2::{Digest, Sha256};
use tracing::warn;

impl AppState {
    /// Relays one end-to-end-encrypted payload. Returns the acknowledgment
    /// for the sender: `message_delivered` when the receiver had live
    /// handles, `message_queued` otherwise.
    pub async fn relay_send(
        &self,
        sender_id: i64,
        receiver_id: i64,
        message_type: MessageType,
        payload: &str,
        external_id: Option<String>,
    ) -> Result<ServerEvent> {
        if !self.presence.is_online(sender_id).await {
            return Err(RelayError::Unauthenticated(
                "Sender has no active session".to_string(),
            ));
        }

        let timestamp = now_millis();
        let external_id = external_id.unwrap_or_else(|| timestamp.to_string());

        // Metadata only; the ciphertext itself is never persisted
        let record = MessageRecord {
            id: 0,
            external_id: external_id.clone(),
            sender_id,
            receiver_id,
            message_type,
            payload_ref: payload_digest(payload),
            state: MessageState::Sent,
            created_at: timestamp,
        };
        let record_id = match self.db.append_message(&record).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("Failed to log message {}: {}", external_id, err);
                None
            }
        };

        let handles = self.presence.lookup(receiver_id).await;
        if handles.is_empty() {
            self.advance_absorbed(record_id, MessageState::Queued).await;
            return Ok(ServerEvent::MessageQueued {
                message_id: external_id,
                receiver_id,
                status: "queued".to_string(),
                timestamp,
            });
        }

        let frame = ServerEvent::ReceiveMessage {
            sender_id,
            payload: payload.to_string(),
            message_type,
            message_id: external_id.clone(),
            timestamp,
        }
        .to_frame();
        for handle in &handles {
            let _ = handle.send(frame.clone());
        }

        self.advance_absorbed(record_id, MessageState::Delivered).await;
        Ok(ServerEvent::MessageDelivered {
            message_id: external_id,
            receiver_id,
            timestamp,
        })
    }

    /// Typing indicator fan-out. No persistence, no acknowledgment.
    pub async fn relay_typing(&self, sender_id: i64, receiver_id: i64, is_typing: bool) {
        let frame = ServerEvent::UserTyping {
            user_id: sender_id,
            is_typing,
        }
        .to_frame();
        for handle in self.presence.lookup(receiver_id).await {
            let _ = handle.send(frame.clone());
        }
    }

    /// Read-receipt fan-out to the original sender. The persisted record
    /// keeps its delivered/queued state.
    pub async fn relay_mark_read(
        &self,
        reader_id: i64,
        original_sender_id: i64,
        message_id: &str,
    ) {
        let frame = ServerEvent::MessageReadReceipt {
            message_id: message_id.to_string(),
            read_by: reader_id,
        }
        .to_frame();
        for handle in self.presence.lookup(original_sender_id).await {
            let _ = handle.send(frame.clone());
        }
    }

    /// Log-state advance on the relay path: failures are logged, never fatal.
    async fn advance_absorbed(&self, record_id: Option<i64>, to: MessageState) {
        if let Some(record_id) = record_id {
            if let Err(err) = self.db.advance_message_state(record_id, to).await {
                warn!(
                    "Failed to advance message {} to {}: {}",
                    record_id,
                    to.as_str(),
                    err
                );
            }
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Hex SHA-256 of the ciphertext. The log stores this reference, never the
/// payload.
fn payload_digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
