use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PresenceStatus;

/// Commands sent FROM client TO server over the WebSocket.
///
/// Wire form is `{ "action": "...", "data": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the connection with an opaque credential.
    #[serde(rename_all = "camelCase")]
    Authenticate { token: String },

    /// Start (or idempotently re-join) a conversation with a peer.
    #[serde(rename_all = "camelCase")]
    StartConversation { peer_id: String },

    /// Send a message. `message_id` is chosen by the sender and is the
    /// deduplication key together with the conversation identifier.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        message_id: String,
        content: String,
    },

    /// End the conversation for both participants.
    #[serde(rename_all = "camelCase")]
    EndConversation {
        conversation_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Re-assert presence. Offline releases the connection handle without
    /// closing the socket; online re-binds it.
    #[serde(rename_all = "camelCase")]
    UpdatePresence { status: PresenceStatus },

    /// Typing indicator for the current conversation.
    #[serde(rename_all = "camelCase")]
    UpdateTyping {
        conversation_id: String,
        is_typing: bool,
    },

    /// Mark (or unmark) this participant ready for the next question.
    #[serde(rename_all = "camelCase")]
    SetReady { conversation_id: String, ready: bool },
}

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Acknowledges successful authentication of this connection.
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: String },

    /// A conversation is now active for both participants.
    #[serde(rename_all = "camelCase")]
    ConversationStarted {
        chat_id: String,
        participants: Vec<String>,
        question_index: u32,
    },

    /// The conversation was ended by one of the participants.
    #[serde(rename_all = "camelCase")]
    ConversationEnded {
        chat_id: String,
        ended_by: String,
        reason: Option<String>,
    },

    /// Send confirmation, delivered to the sender. `queued` is true when the
    /// recipient could not be reached live.
    #[serde(rename_all = "camelCase")]
    MessageConfirmed {
        chat_id: String,
        message_id: String,
        sent_at: DateTime<Utc>,
        queued: bool,
    },

    /// A message pushed to the recipient, either live or during catch-up.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: String,
        message_id: String,
        sender_id: String,
        content: String,
        sent_at: DateTime<Utc>,
    },

    /// A paired peer's presence changed.
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        user_id: String,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },

    /// A paired peer started or stopped typing.
    #[serde(rename_all = "camelCase")]
    TypingUpdate {
        chat_id: String,
        user_id: String,
        is_typing: bool,
    },

    /// A paired peer toggled their ready flag.
    #[serde(rename_all = "camelCase")]
    ReadyUpdate {
        chat_id: String,
        user_id: String,
        ready: bool,
    },

    /// Both participants were ready; the question index advanced.
    #[serde(rename_all = "camelCase")]
    QuestionAdvanced {
        chat_id: String,
        question_index: u32,
    },

    /// A unit of work failed; `error` is a stable snake_case code.
    #[serde(rename_all = "camelCase")]
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_envelope_uses_action_and_data() {
        let raw = r#"{"action":"sendMessage","data":{"conversationId":"u1#u2","messageId":"m1","content":"hey"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            GatewayCommand::SendMessage {
                conversation_id,
                message_id,
                content,
            } => {
                assert_eq!(conversation_id, "u1#u2");
                assert_eq!(message_id, "m1");
                assert_eq!(content, "hey");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn end_conversation_reason_is_optional() {
        let raw = r#"{"action":"endConversation","data":{"conversationId":"u1#u2"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            cmd,
            GatewayCommand::EndConversation { reason: None, .. }
        ));
    }

    #[test]
    fn event_envelope_round_trips_camel_case() {
        let event = GatewayEvent::ConversationEnded {
            chat_id: "u1#u2".into(),
            ended_by: "u1".into(),
            reason: Some("user_ended".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "conversationEnded");
        assert_eq!(json["data"]["chatId"], "u1#u2");
        assert_eq!(json["data"]["endedBy"], "u1");
    }

    #[test]
    fn presence_status_serializes_lowercase() {
        let cmd = GatewayCommand::UpdatePresence {
            status: PresenceStatus::Offline,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "updatePresence");
        assert_eq!(json["data"]["status"], "offline");
    }
}
