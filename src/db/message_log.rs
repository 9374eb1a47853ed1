//! Append-mostly message log.
//!
//! Written only by the relay engine. One append path, one permitted state
//! update (sent to delivered or queued). No general update, no delete; read
//! access is limited to the single-row state probe used by tests and
//! diagnostics.

use crate::db::Database;
use crate::models::{MessageRecord, MessageState};
use anyhow::{bail, Context, Result};
use sqlx::Row;

impl Database {
    /// Appends a message metadata record with state `sent`; returns the row
    /// id used for the later state advance.
    pub async fn append_message(&self, record: &MessageRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_log
                (external_id, sender_id, receiver_id, message_type, payload_ref, state, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.external_id)
        .bind(record.sender_id)
        .bind(record.receiver_id)
        .bind(record.message_type.as_str())
        .bind(&record.payload_ref)
        .bind(record.state.as_str())
        .bind(record.created_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to append message record")?;

        Ok(result.last_insert_rowid())
    }

    /// Advances a record along the single permitted path: sent to delivered
    /// or sent to queued. Returns false when the row was not in `sent`
    /// (already advanced), keeping the state machine monotonic.
    pub async fn advance_message_state(&self, record_id: i64, to: MessageState) -> Result<bool> {
        if !matches!(to, MessageState::Delivered | MessageState::Queued) {
            bail!("message state can only advance from sent to delivered or queued");
        }

        let result = sqlx::query(
            "UPDATE message_log SET state = ?1 WHERE id = ?2 AND state = 'sent'",
        )
        .bind(to.as_str())
        .bind(record_id)
        .execute(&self.pool)
        .await
        .context("Failed to advance message state")?;

        Ok(result.rows_affected() > 0)
    }

    /// Current state of a single record.
    pub async fn message_state(&self, record_id: i64) -> Result<Option<MessageState>> {
        let row = sqlx::query("SELECT state FROM message_log WHERE id = ?1")
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch message state")?;

        match row {
            Some(row) => {
                let state: String = row.get("state");
                Ok(Some(state.parse().map_err(anyhow::Error::msg)?))
            }
            None => Ok(None),
        }
    }
}
