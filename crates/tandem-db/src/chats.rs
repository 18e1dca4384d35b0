//! Conversation Store. Records are keyed `(id, epoch)` where `id` is the
//! deterministic sorted-pair identifier and `chat_current` tracks the live
//! epoch, so a restarted pair reuses the wire identifier without resurrecting
//! ended-epoch state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use tandem_types::models::{Conversation, ConversationStatus};

use crate::models::{parse_chat_status, parse_ts, StartOutcome};
use crate::{Database, Result, StoreError};

impl Database {
    /// Idempotent conversation start. The create-if-absent on `chat_current`
    /// decides the double-start race: the loser observes the winner's epoch
    /// and gets `AlreadyActive` instead of an error.
    pub fn start_chat(
        &self,
        id: &str,
        initiator_id: &str,
        peer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        self.with_conn(|conn| {
            let created = conn.execute(
                "INSERT OR IGNORE INTO chat_current (id, epoch) VALUES (?1, 1)",
                params![id],
            )?;
            if created == 1 {
                insert_epoch(conn, id, 1, initiator_id, peer_id, now)?;
                let chat = query_chat(conn, id, 1)?
                    .ok_or_else(|| StoreError::Inconsistent(format!("missing chat {id}#1")))?;
                return Ok(StartOutcome::Created(chat));
            }

            let epoch = current_epoch(conn, id)?;
            if let Some(chat) = query_chat(conn, id, epoch)? {
                if chat.status == ConversationStatus::Active {
                    return Ok(StartOutcome::AlreadyActive(chat));
                }
            }

            // Current epoch ended: mint the next one. The bump is conditional
            // on the epoch we read, so a racing start bumps exactly once.
            let bumped = conn.execute(
                "UPDATE chat_current SET epoch = epoch + 1 WHERE id = ?1 AND epoch = ?2",
                params![id, epoch],
            )?;
            let next = if bumped == 1 {
                epoch + 1
            } else {
                current_epoch(conn, id)?
            };

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chats
                     (id, epoch, initiator_id, peer_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
                params![id, next, initiator_id, peer_id, now.to_rfc3339()],
            )?;
            let chat = query_chat(conn, id, next)?
                .ok_or_else(|| StoreError::Inconsistent(format!("missing chat {id}#{next}")))?;

            if inserted == 1 {
                Ok(StartOutcome::Created(chat))
            } else {
                Ok(StartOutcome::AlreadyActive(chat))
            }
        })
    }

    /// The current-epoch record for a pair identifier, active or ended.
    pub fn current_chat(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let epoch: Option<i64> = conn
                .query_row(
                    "SELECT epoch FROM chat_current WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match epoch {
                None => Ok(None),
                Some(epoch) => query_chat(conn, id, epoch),
            }
        })
    }

    /// One-way active→ended transition on the current epoch. Returns the
    /// ended record, or None when the conversation is unknown or already
    /// ended — the conditional update guarantees at most one caller wins.
    pub fn end_chat(
        &self,
        id: &str,
        ended_by: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let epoch: Option<i64> = conn
                .query_row(
                    "SELECT epoch FROM chat_current WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(epoch) = epoch else {
                return Ok(None);
            };

            let changed = conn.execute(
                "UPDATE chats
                 SET status = 'ended', ended_by = ?3, end_reason = ?4, updated_at = ?5
                 WHERE id = ?1 AND epoch = ?2 AND status = 'active'",
                params![id, epoch, ended_by, reason, now.to_rfc3339()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_chat(conn, id, epoch)
        })
    }

    /// Refresh the last-message summary on an epoch row.
    pub fn set_last_message(
        &self,
        id: &str,
        epoch: i64,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET last_message = ?3, updated_at = ?4
                 WHERE id = ?1 AND epoch = ?2",
                params![id, epoch, summary, now.to_rfc3339()],
            )?;
            Ok(())
        })
    }
}

fn current_epoch(conn: &Connection, id: &str) -> Result<i64> {
    let epoch = conn.query_row(
        "SELECT epoch FROM chat_current WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(epoch)
}

fn insert_epoch(
    conn: &Connection,
    id: &str,
    epoch: i64,
    initiator_id: &str,
    peer_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, epoch, initiator_id, peer_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
        params![id, epoch, initiator_id, peer_id, now.to_rfc3339()],
    )?;
    Ok(())
}

fn query_chat(conn: &Connection, id: &str, epoch: i64) -> Result<Option<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT id, epoch, initiator_id, peer_id, status, ended_by, end_reason,
                last_message, created_at, updated_at
         FROM chats WHERE id = ?1 AND epoch = ?2",
    )?;

    let row = stmt
        .query_row(params![id, epoch], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                epoch: row.get(1)?,
                initiator_id: row.get(2)?,
                peer_id: row.get(3)?,
                status: parse_chat_status(4, row.get(4)?)?,
                ended_by: row.get(5)?,
                end_reason: row.get(6)?,
                last_message: row.get(7)?,
                created_at: parse_ts(8, row.get(8)?)?,
                updated_at: parse_ts(9, row.get(9)?)?,
            })
        })
        .optional()?;

    Ok(row)
}
