//! Persistence of outbound delivery envelopes.
//!
//! The retry bookkeeping lives entirely in these rows so that a restarted
//! process can resume resending purely from stored counters.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use concord_shared::protocol::MessageType;
use concord_shared::types::{InstallationId, MessageId, UserId};

use crate::database::{conversion_error, not_found, Database};
use crate::error::Result;
use crate::models::RawMessage;

const COLUMNS: &str = "id, local_chat_id, message_type, payload, recipients, target_installation,
    last_sent, send_count, sent, terminal, resend_automatically, skip_encryption,
    skip_group_message_wrap, send_push_notification, send_on_personal_topic, created_at, next_attempt_at";

impl Database {
    pub fn insert_raw_message(&self, message: &RawMessage) -> Result<()> {
        let recipients: Vec<String> = message.recipients.iter().map(UserId::to_hex).collect();
        self.conn().execute(
            &format!(
                "INSERT INTO raw_messages ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                message.id.0.to_string(),
                message.local_chat_id,
                message.message_type as u8,
                message.payload,
                serde_json::to_string(&recipients)?,
                message.target_installation.map(|i| i.0.to_string()),
                message.last_sent as i64,
                message.send_count,
                message.sent,
                message.terminal,
                message.resend_automatically,
                message.skip_encryption,
                message.skip_group_message_wrap,
                message.send_push_notification,
                message.send_on_personal_topic,
                message.created_at.to_rfc3339(),
                message.next_attempt_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_raw_message(&self, id: &MessageId) -> Result<RawMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM raw_messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_raw_message,
            )
            .map_err(not_found)
    }

    pub fn find_raw_message(&self, id: &MessageId) -> Result<Option<RawMessage>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM raw_messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_raw_message,
            )
            .optional()?)
    }

    /// Pending, automatically resent messages whose backoff has elapsed at
    /// `now`, longest overdue first.
    pub fn list_due_raw_messages(&self, now: u64, limit: usize) -> Result<Vec<RawMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM raw_messages
             WHERE sent = 0 AND terminal = 0 AND resend_automatically = 1
               AND next_attempt_at <= ?1
             ORDER BY next_attempt_at ASC, created_at ASC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![now as i64, limit as i64], row_to_raw_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn list_raw_messages(&self) -> Result<Vec<RawMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM raw_messages ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_raw_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Record a successful hand-off to the transport.
    pub fn mark_raw_message_sent(&self, id: &MessageId, now: u64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE raw_messages SET sent = 1, last_sent = ?2 WHERE id = ?1",
            params![id.0.to_string(), now as i64],
        )?;
        Ok(affected > 0)
    }

    /// Record a failed attempt and when the next one may happen. The counter
    /// is incremented in SQL so it can only ever grow.
    pub fn record_raw_message_failure(
        &self,
        id: &MessageId,
        now: u64,
        next_attempt_at: u64,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE raw_messages
             SET send_count = send_count + 1, last_sent = ?2, next_attempt_at = ?3
             WHERE id = ?1 AND sent = 0",
            params![id.0.to_string(), now as i64, next_attempt_at as i64],
        )?;
        Ok(affected > 0)
    }

    /// Stop any further attempts for this message.
    pub fn mark_raw_message_terminal(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE raw_messages SET terminal = 1 WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_raw_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    let id_str: String = row.get(0)?;
    let type_byte: u8 = row.get(2)?;
    let recipients_json: String = row.get(4)?;
    let target_str: Option<String> = row.get(5)?;
    let last_sent: i64 = row.get(6)?;
    let created_str: String = row.get(15)?;
    let next_attempt_at: i64 = row.get(16)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
    let message_type = MessageType::from_byte(type_byte)
        .ok_or_else(|| rusqlite::Error::IntegralValueOutOfRange(2, i64::from(type_byte)))?;

    let recipient_hex: Vec<String> =
        serde_json::from_str(&recipients_json).map_err(|e| conversion_error(4, e))?;
    let recipients = recipient_hex
        .iter()
        .map(|h| UserId::from_hex(h))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| conversion_error(4, e))?;

    let target_installation = target_str
        .map(|s| Uuid::parse_str(&s).map(InstallationId))
        .transpose()
        .map_err(|e| conversion_error(5, e))?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(15, e))?;

    Ok(RawMessage {
        id: MessageId(id),
        local_chat_id: row.get(1)?,
        message_type,
        payload: row.get(3)?,
        recipients,
        target_installation,
        last_sent: last_sent as u64,
        send_count: row.get(7)?,
        next_attempt_at: next_attempt_at as u64,
        sent: row.get(8)?,
        terminal: row.get(9)?,
        resend_automatically: row.get(10)?,
        skip_encryption: row.get(11)?,
        skip_group_message_wrap: row.get(12)?,
        send_push_notification: row.get(13)?,
        send_on_personal_topic: row.get(14)?,
        created_at,
    })
}
