//! Message Log: per-conversation append log. `(chat_id, message_id)` is the
//! primary key and the deduplication key; the queued flag flips to false at
//! most once, either on confirmed live push or on a catch-up fetch.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use tandem_types::models::StoredMessage;

use crate::models::{parse_ts, HistoryPage};
use crate::{Database, Result};

impl Database {
    /// Append a message to the log. Returns false when the deduplication key
    /// already exists (a resend), in which case nothing is written.
    pub fn insert_message(&self, msg: &StoredMessage) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO messages
                     (chat_id, message_id, epoch, sender_id, recipient_id, content, sent_at, queued)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.chat_id,
                    msg.message_id,
                    msg.epoch,
                    msg.sender_id,
                    msg.recipient_id,
                    msg.content,
                    msg.sent_at.to_rfc3339(),
                    msg.queued,
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<StoredMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND message_id = ?2"
            ))?;
            let row = stmt
                .query_row(params![chat_id, message_id], map_message)
                .optional()?;
            Ok(row)
        })
    }

    /// Flip queued→delivered after a confirmed live push. Conditional on the
    /// flag still being set, so a delivered message can never revert.
    pub fn mark_delivered(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET queued = 0
                 WHERE chat_id = ?1 AND message_id = ?2 AND queued = 1",
                params![chat_id, message_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Catch-up read: every queued message addressed to `recipient_id`, in
    /// send order per conversation. Each returned message is marked delivered
    /// as a side effect of the fetch (at-least-once; receivers deduplicate on
    /// the message key).
    pub fn take_queued(&self, recipient_id: &str) -> Result<Vec<StoredMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE recipient_id = ?1 AND queued = 1
                 ORDER BY chat_id, rowid"
            ))?;
            let mut rows = stmt
                .query_map(params![recipient_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for msg in &mut rows {
                conn.execute(
                    "UPDATE messages SET queued = 0
                     WHERE chat_id = ?1 AND message_id = ?2 AND queued = 1",
                    params![msg.chat_id, msg.message_id],
                )?;
                msg.queued = false;
            }

            Ok(rows)
        })
    }

    /// Paginated history for one conversation, newest first. `before` is the
    /// `(sent_at, rowid)` cursor of the previous page's oldest message; the
    /// rowid tiebreak keeps messages sharing a timestamp from being skipped
    /// at a page boundary.
    pub fn chat_history(
        &self,
        chat_id: &str,
        limit: u32,
        before: Option<(DateTime<Utc>, i64)>,
    ) -> Result<HistoryPage> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}, rowid FROM messages
                 WHERE chat_id = ?1
                   AND (?2 IS NULL OR sent_at < ?2 OR (sent_at = ?2 AND rowid < ?3))
                 ORDER BY sent_at DESC, rowid DESC
                 LIMIT ?4"
            ))?;
            let (before_ts, before_rowid) = match before {
                Some((ts, rowid)) => (Some(ts.to_rfc3339()), rowid),
                None => (None, 0),
            };
            // Fetch one past the page to learn whether more remain.
            let mut rows = stmt
                .query_map(
                    params![chat_id, before_ts, before_rowid, limit + 1],
                    |row| Ok((row.get::<_, i64>(8)?, map_message(row)?)),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let has_more = rows.len() > limit as usize;
            rows.truncate(limit as usize);
            let next = if has_more {
                rows.last().map(|(rowid, msg)| (msg.sent_at, *rowid))
            } else {
                None
            };
            Ok(HistoryPage {
                messages: rows.into_iter().map(|(_, msg)| msg).collect(),
                has_more,
                next,
            })
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "chat_id, message_id, epoch, sender_id, recipient_id, content, sent_at, queued";

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        chat_id: row.get(0)?,
        message_id: row.get(1)?,
        epoch: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        content: row.get(5)?,
        sent_at: parse_ts(6, row.get(6)?)?,
        queued: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn message(chat_id: &str, message_id: &str, recipient: &str) -> StoredMessage {
        StoredMessage {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            epoch: 1,
            sender_id: "u1".into(),
            recipient_id: recipient.into(),
            content: format!("body of {message_id}"),
            sent_at: Utc::now(),
            queued: true,
        }
    }

    #[test]
    fn duplicate_message_id_is_ignored() {
        let (_dir, db) = open_db();
        assert!(db.insert_message(&message("u1#u2", "m1", "u2")).unwrap());
        assert!(!db.insert_message(&message("u1#u2", "m1", "u2")).unwrap());

        // Same id in a different conversation is a distinct key.
        assert!(db.insert_message(&message("u1#u3", "m1", "u3")).unwrap());
    }

    #[test]
    fn take_queued_returns_each_message_once() {
        let (_dir, db) = open_db();
        db.insert_message(&message("u1#u2", "m1", "u2")).unwrap();
        db.insert_message(&message("u1#u2", "m2", "u2")).unwrap();

        let first = db.take_queued("u2").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message_id, "m1");
        assert_eq!(first[1].message_id, "m2");
        assert!(first.iter().all(|m| !m.queued));

        // The fetch marked them delivered; a second catch-up is empty.
        assert!(db.take_queued("u2").unwrap().is_empty());
    }

    #[test]
    fn delivered_message_skips_catch_up() {
        let (_dir, db) = open_db();
        db.insert_message(&message("u1#u2", "m1", "u2")).unwrap();
        assert!(db.mark_delivered("u1#u2", "m1").unwrap());
        // Already delivered: conditional update does not fire again.
        assert!(!db.mark_delivered("u1#u2", "m1").unwrap());

        assert!(db.take_queued("u2").unwrap().is_empty());
    }

    #[test]
    fn history_pages_newest_first() {
        let (_dir, db) = open_db();
        for i in 0..5 {
            let mut msg = message("u1#u2", &format!("m{i}"), "u2");
            msg.sent_at = Utc::now() + chrono::Duration::seconds(i);
            db.insert_message(&msg).unwrap();
        }

        let page = db.chat_history("u1#u2", 2, None).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.messages[0].message_id, "m4");
        assert_eq!(page.messages[1].message_id, "m3");

        let older = db.chat_history("u1#u2", 10, page.next).unwrap();
        assert_eq!(older.messages.len(), 3);
        assert!(!older.has_more);
        assert_eq!(older.messages[0].message_id, "m2");
        assert_eq!(older.next, None);
    }

    #[test]
    fn history_cursor_keeps_shared_timestamps() {
        let (_dir, db) = open_db();
        let now = Utc::now();
        for i in 0..4 {
            let mut msg = message("u1#u2", &format!("m{i}"), "u2");
            // All four share one timestamp; only insertion order separates them.
            msg.sent_at = now;
            db.insert_message(&msg).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.chat_history("u1#u2", 1, cursor).unwrap();
            seen.extend(page.messages.into_iter().map(|m| m.message_id));
            if !page.has_more {
                break;
            }
            cursor = page.next;
        }
        assert_eq!(seen, vec!["m3", "m2", "m1", "m0"]);
    }
}
