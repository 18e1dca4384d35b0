use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator used when deriving a conversation identifier from a user pair.
pub const CHAT_ID_SEPARATOR: char = '#';

/// Deterministic conversation identifier for an unordered pair of users:
/// the two identifiers sorted lexicographically and joined by `#`.
/// `conversation_id(a, b) == conversation_id(b, a)` for every pair, which is
/// what makes duplicate-start detection possible.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{CHAT_ID_SEPARATOR}{b}")
    } else {
        format!("{b}{CHAT_ID_SEPARATOR}{a}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Ended,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Durable per-user presence record.
///
/// Invariant maintained by the store: `connection_id` is non-null exactly when
/// `status` is online. The conversation-scoped fields (`chat_id`,
/// `question_index`, `ready`, `is_typing`) are cleared together when the
/// conversation ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: String,
    pub email: Option<String>,
    pub connection_id: Option<Uuid>,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    pub chat_id: Option<String>,
    pub question_index: u32,
    pub ready: bool,
    pub is_typing: bool,
}

/// Durable conversation record for one epoch of a pair.
///
/// `id` is the deterministic pair identifier; `epoch` distinguishes restarts
/// of the same pair. The participant columns preserve initiator order for
/// display even though `id` is order-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub epoch: i64,
    pub initiator_id: String,
    pub peer_id: String,
    pub status: ConversationStatus,
    pub ended_by: Option<String>,
    pub end_reason: Option<String>,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.initiator_id == user_id || self.peer_id == user_id
    }

    /// The other participant, if `user_id` is one of the pair.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.initiator_id == user_id {
            Some(&self.peer_id)
        } else if self.peer_id == user_id {
            Some(&self.initiator_id)
        } else {
            None
        }
    }
}

/// One message in the per-conversation append log.
///
/// (`chat_id`, `message_id`) is the deduplication key; `queued` starts true
/// and flips to false exactly once, on confirmed push or catch-up fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub chat_id: String,
    pub epoch: i64,
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub queued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        assert_eq!(conversation_id("u1", "u2"), conversation_id("u2", "u1"));
        assert_eq!(conversation_id("u1", "u2"), "u1#u2");
    }

    #[test]
    fn conversation_id_sorts_lexicographically() {
        assert_eq!(conversation_id("zeta", "alpha"), "alpha#zeta");
        assert_eq!(conversation_id("alpha", "zeta"), "alpha#zeta");
    }

    #[test]
    fn peer_of_resolves_both_directions() {
        let chat = Conversation {
            id: conversation_id("u1", "u2"),
            epoch: 1,
            initiator_id: "u1".into(),
            peer_id: "u2".into(),
            status: ConversationStatus::Active,
            ended_by: None,
            end_reason: None,
            last_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(chat.peer_of("u1"), Some("u2"));
        assert_eq!(chat.peer_of("u2"), Some("u1"));
        assert_eq!(chat.peer_of("u3"), None);
        assert!(!chat.is_participant("u3"));
    }
}
