use thiserror::Error;

use tandem_db::StoreError;
use tandem_identity::AuthError;

/// Failures scoped to a single unit of work. Nothing here is fatal to the
/// process; each surfaces to the offending connection as an `error` event
/// with a stable snake_case code.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("peer not found")]
    PeerNotFound,

    #[error("participant already in a conversation")]
    ParticipantBusy,

    #[error("not a participant of this conversation")]
    Forbidden,

    #[error("conversation already ended")]
    ConversationEnded,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::NotAuthenticated => "not_authenticated",
            Self::Validation(_) => "invalid_request",
            Self::ConversationNotFound => "not_found",
            Self::PeerNotFound => "peer_not_found",
            Self::ParticipantBusy => "participant_busy",
            Self::Forbidden => "forbidden",
            Self::ConversationEnded => "conversation_ended",
            Self::Store(_) | Self::Internal(_) => "internal_error",
        }
    }
}
