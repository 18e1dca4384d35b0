use chrono::{DateTime, Utc};
use serde::Deserialize;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use tracing::error;

use tandem_identity::VerifiedIdentity;
use tandem_types::api::{HistoryResponse, MessageDto, QueuedResponse};
use tandem_types::models::StoredMessage;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass `nextCursor` from the previous page to
    /// fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// Paginated message history for one conversation, newest first. Only the
/// persisted participant pair may read it.
pub async fn get_history(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.min(200);
    let before = match &query.before {
        None => None,
        Some(raw) => Some(
            parse_cursor(raw)
                .ok_or_else(|| ApiError::BadRequest("invalid before cursor".into()))?,
        ),
    };

    // Run blocking DB reads off the async runtime.
    let db = state.db.clone();
    let cid = chat_id.clone();
    let (chat, page) = tokio::task::spawn_blocking(move || {
        let chat = db.current_chat(&cid)?;
        let page = db.chat_history(&cid, limit, before)?;
        Ok::<_, tandem_db::StoreError>((chat, page))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {e}");
        ApiError::Internal("history task failed".into())
    })??;

    let chat = chat.ok_or(ApiError::NotFound)?;
    if !chat.is_participant(&identity.user_id) {
        return Err(ApiError::Forbidden);
    }

    Ok(Json(HistoryResponse {
        messages: page.messages.iter().map(to_dto).collect(),
        has_more: page.has_more,
        next_cursor: page
            .next
            .map(|(ts, rowid)| format!("{},{rowid}", ts.to_rfc3339())),
    }))
}

/// Cursor wire form is `<rfc3339 sent_at>,<rowid>`, as emitted in
/// `nextCursor`. Clients treat it as opaque.
fn parse_cursor(raw: &str) -> Option<(DateTime<Utc>, i64)> {
    let (ts, rowid) = raw.rsplit_once(',')?;
    let ts = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    let rowid = rowid.parse().ok()?;
    Some((ts, rowid))
}

/// Catch-up fetch over HTTP: queued messages addressed to the caller, marked
/// delivered as a side effect of the read. Shares the at-least-once
/// fetch-then-mark discipline with the gateway's reconnect replay.
pub async fn get_queued(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = identity.user_id.clone();
    let rows = tokio::task::spawn_blocking(move || db.take_queued(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {e}");
            ApiError::Internal("queued-fetch task failed".into())
        })??;

    Ok(Json(QueuedResponse {
        messages: rows.iter().map(to_dto).collect(),
    }))
}

fn to_dto(msg: &StoredMessage) -> MessageDto {
    MessageDto {
        chat_id: msg.chat_id.clone(),
        message_id: msg.message_id.clone(),
        sender_id: msg.sender_id.clone(),
        content: msg.content.clone(),
        sent_at: msg.sent_at,
        queued: msg.queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tandem_db::Database;
    use tandem_identity::{AuthError, IdentityVerifier};
    use tandem_types::api::Claims;

    struct NoVerifier;

    impl IdentityVerifier for NoVerifier {
        fn verify(&self, _token: &str) -> Result<VerifiedIdentity, AuthError> {
            Err(AuthError::InvalidToken)
        }
    }

    fn identity(user_id: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: user_id.into(),
            email: None,
            claims: Claims {
                sub: user_id.into(),
                email: None,
                exp: 4102444800,
            },
        }
    }

    fn seeded_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("api.db")).unwrap());

        db.start_chat("u1#u2", "u1", "u2", Utc::now()).unwrap();
        for i in 0..3 {
            db.insert_message(&StoredMessage {
                chat_id: "u1#u2".into(),
                epoch: 1,
                message_id: format!("m{i}"),
                sender_id: "u1".into(),
                recipient_id: "u2".into(),
                content: format!("message {i}"),
                sent_at: Utc::now() + chrono::Duration::seconds(i),
                queued: true,
            })
            .unwrap();
        }

        (dir, AppState::new(db, Arc::new(NoVerifier)))
    }

    #[tokio::test]
    async fn history_pages_with_cursor() {
        let (_dir, state) = seeded_state();

        let page = get_history(
            State(state.clone()),
            Path("u1#u2".into()),
            Query(HistoryQuery {
                limit: 2,
                before: None,
            }),
            Extension(identity("u1")),
        )
        .await
        .unwrap();

        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.messages[0].message_id, "m2");
        let cursor = page.next_cursor.clone().unwrap();

        let rest = get_history(
            State(state),
            Path("u1#u2".into()),
            Query(HistoryQuery {
                limit: 10,
                before: Some(cursor),
            }),
            Extension(identity("u1")),
        )
        .await
        .unwrap();
        assert_eq!(rest.messages.len(), 1);
        assert!(!rest.has_more);
        assert_eq!(rest.next_cursor, None);
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let (_dir, state) = seeded_state();

        let err = get_history(
            State(state),
            Path("u1#u2".into()),
            Query(HistoryQuery {
                limit: 10,
                before: Some("not-a-cursor".into()),
            }),
            Extension(identity("u1")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn history_is_scoped_to_participants() {
        let (_dir, state) = seeded_state();

        let err = get_history(
            State(state.clone()),
            Path("u1#u2".into()),
            Query(HistoryQuery {
                limit: 10,
                before: None,
            }),
            Extension(identity("u3")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));

        let err = get_history(
            State(state),
            Path("nope#nope".into()),
            Query(HistoryQuery {
                limit: 10,
                before: None,
            }),
            Extension(identity("u1")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn queued_fetch_drains_once() {
        let (_dir, state) = seeded_state();

        let first = get_queued(State(state.clone()), Extension(identity("u2")))
            .await
            .unwrap();
        assert_eq!(first.messages.len(), 3);
        assert!(first.messages.iter().all(|m| !m.queued));

        let second = get_queued(State(state), Extension(identity("u2")))
            .await
            .unwrap();
        assert!(second.messages.is_empty());
    }
}
