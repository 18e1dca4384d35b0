use crate::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS presence (
            user_id        TEXT PRIMARY KEY,
            email          TEXT,
            connection_id  TEXT,
            status         TEXT NOT NULL DEFAULT 'offline',
            last_seen      TEXT NOT NULL,
            chat_id        TEXT,
            question_index INTEGER NOT NULL DEFAULT 0,
            ready          INTEGER NOT NULL DEFAULT 0,
            is_typing      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_presence_chat
            ON presence(chat_id);

        -- Secondary index from deterministic pair id to the current epoch.
        -- Ended epochs stay in `chats` and are never touched again.
        CREATE TABLE IF NOT EXISTS chat_current (
            id    TEXT PRIMARY KEY,
            epoch INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            id           TEXT NOT NULL,
            epoch        INTEGER NOT NULL,
            initiator_id TEXT NOT NULL,
            peer_id      TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'active',
            ended_by     TEXT,
            end_reason   TEXT,
            last_message TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (id, epoch)
        );

        CREATE TABLE IF NOT EXISTS messages (
            chat_id      TEXT NOT NULL,
            message_id   TEXT NOT NULL,
            epoch        INTEGER NOT NULL,
            sender_id    TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            content      TEXT NOT NULL,
            sent_at      TEXT NOT NULL,
            queued       INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (chat_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_recipient_queued
            ON messages(recipient_id, queued);

        CREATE INDEX IF NOT EXISTS idx_messages_chat_sent
            ON messages(chat_id, sent_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
