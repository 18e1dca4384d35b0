//! Presence Store: one durable record per user. All mutations here are
//! single-statement conditional writes so concurrent transport events cannot
//! leave half-applied state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use tandem_types::models::Presence;

use crate::models::{parse_opt_uuid, parse_presence_status, parse_ts};
use crate::{Database, Result};

impl Database {
    /// Bind a connection handle to a user, creating the record on first
    /// authentication. One atomic upsert: any previous handle is superseded
    /// without being consulted, so the ordering of concurrent authenticate
    /// calls cannot matter. Conversation-scoped fields are left untouched.
    pub fn bind_connection(
        &self,
        user_id: &str,
        email: Option<&str>,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (user_id, email, connection_id, status, last_seen)
                 VALUES (?1, ?2, ?3, 'online', ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     email = COALESCE(excluded.email, email),
                     connection_id = excluded.connection_id,
                     status = 'online',
                     last_seen = excluded.last_seen",
                params![user_id, email, connection_id.to_string(), now.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Clear the handle and go offline, but only while `connection_id` is
    /// still the bound handle. Returns false when the handle was superseded
    /// by a newer authentication, in which case nothing is touched.
    pub fn release_connection(
        &self,
        user_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence
                 SET connection_id = NULL, status = 'offline', last_seen = ?3
                 WHERE user_id = ?1 AND connection_id = ?2",
                params![user_id, connection_id.to_string(), now.to_rfc3339()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Re-assert an existing binding as online. Conditional on the handle:
    /// the record must be unbound or already owned by `connection_id`, so an
    /// orphaned superseded connection cannot re-claim the user from a newer
    /// session. Returns false when the assert lost.
    pub fn reassert_connection(
        &self,
        user_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence
                 SET connection_id = ?2, status = 'online', last_seen = ?3
                 WHERE user_id = ?1 AND (connection_id IS NULL OR connection_id = ?2)",
                params![user_id, connection_id.to_string(), now.to_rfc3339()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_presence(&self, user_id: &str) -> Result<Option<Presence>> {
        self.with_conn(|conn| query_presence(conn, user_id))
    }

    /// Point the user at a conversation. A fresh claim resets the turn
    /// fields; re-claiming the conversation the user is already in leaves
    /// them untouched. Succeeds only when the user has no active conversation
    /// or is already in this one; returns false otherwise (participant busy).
    pub fn claim_conversation(&self, user_id: &str, chat_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence
                 SET chat_id = ?2,
                     question_index = CASE WHEN chat_id = ?2 THEN question_index ELSE 0 END,
                     ready = CASE WHEN chat_id = ?2 THEN ready ELSE 0 END,
                     is_typing = CASE WHEN chat_id = ?2 THEN is_typing ELSE 0 END
                 WHERE user_id = ?1 AND (chat_id IS NULL OR chat_id = ?2)",
                params![user_id, chat_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Clear the conversation-scoped fields for every participant still
    /// linked to `chat_id`. Runs regardless of either participant's live
    /// connection state.
    pub fn clear_conversation(&self, chat_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence
                 SET chat_id = NULL, question_index = 0, ready = 0, is_typing = 0
                 WHERE chat_id = ?1",
                params![chat_id],
            )?;
            Ok(changed)
        })
    }

    /// Persist the typing flag, conditional on the caller actually being in
    /// `chat_id`. Returns false when the membership check fails.
    pub fn set_typing(&self, user_id: &str, chat_id: &str, is_typing: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence SET is_typing = ?3 WHERE user_id = ?1 AND chat_id = ?2",
                params![user_id, chat_id, is_typing],
            )?;
            Ok(changed == 1)
        })
    }

    /// Persist the ready flag, conditional on conversation membership.
    pub fn set_ready(&self, user_id: &str, chat_id: &str, ready: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presence SET ready = ?3 WHERE user_id = ?1 AND chat_id = ?2",
                params![user_id, chat_id, ready],
            )?;
            Ok(changed == 1)
        })
    }

    /// Advance the question for the pair, but only while both participants
    /// are ready: a single conditional statement increments both indexes and
    /// clears both ready flags, so racing ready calls advance exactly once.
    /// Returns the new index when the advance fired.
    pub fn advance_if_both_ready(&self, chat_id: &str) -> Result<Option<u32>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "WITH ready_pair AS MATERIALIZED (
                     SELECT user_id FROM presence WHERE chat_id = ?1 AND ready = 1
                 )
                 UPDATE presence
                 SET question_index = question_index + 1, ready = 0
                 WHERE user_id IN (SELECT user_id FROM ready_pair)
                   AND (SELECT COUNT(*) FROM ready_pair) = 2",
                params![chat_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let index: u32 = conn.query_row(
                "SELECT MAX(question_index) FROM presence WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )?;
            Ok(Some(index))
        })
    }
}

fn query_presence(conn: &Connection, user_id: &str) -> Result<Option<Presence>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, email, connection_id, status, last_seen,
                chat_id, question_index, ready, is_typing
         FROM presence WHERE user_id = ?1",
    )?;

    let row = stmt
        .query_row([user_id], |row| {
            Ok(Presence {
                user_id: row.get(0)?,
                email: row.get(1)?,
                connection_id: parse_opt_uuid(2, row.get(2)?)?,
                status: parse_presence_status(3, row.get(3)?)?,
                last_seen: parse_ts(4, row.get(4)?)?,
                chat_id: row.get(5)?,
                question_index: row.get(6)?,
                ready: row.get(7)?,
                is_typing: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}
