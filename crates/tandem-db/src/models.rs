//! Row-mapping helpers shared by the store modules. SQLite hands back TEXT
//! columns; these convert them to the typed fields in tandem-types, surfacing
//! corrupt values as conversion failures instead of panicking.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use tandem_types::models::{Conversation, ConversationStatus, PresenceStatus, StoredMessage};
use uuid::Uuid;

/// Outcome of an idempotent conversation start.
#[derive(Debug)]
pub enum StartOutcome {
    /// A fresh epoch was created for the pair.
    Created(Conversation),
    /// An active epoch already existed; the duplicate start is benign.
    AlreadyActive(Conversation),
}

impl StartOutcome {
    pub fn chat(&self) -> &Conversation {
        match self {
            Self::Created(chat) | Self::AlreadyActive(chat) => chat,
        }
    }
}

/// One page of conversation history, newest first.
#[derive(Debug)]
pub struct HistoryPage {
    pub messages: Vec<StoredMessage>,
    pub has_more: bool,
    /// Composite `(sent_at, rowid)` cursor for the next older page. The rowid
    /// component keeps pagination lossless when messages share a timestamp.
    pub next: Option<(DateTime<Utc>, i64)>,
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_uuid(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    match raw {
        None => Ok(None),
        Some(s) => Uuid::parse_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

pub(crate) fn parse_presence_status(idx: usize, raw: String) -> rusqlite::Result<PresenceStatus> {
    PresenceStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown presence status: {raw}").into(),
        )
    })
}

pub(crate) fn parse_chat_status(idx: usize, raw: String) -> rusqlite::Result<ConversationStatus> {
    ConversationStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown conversation status: {raw}").into(),
        )
    })
}
