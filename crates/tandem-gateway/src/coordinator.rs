//! Session Coordinator: drives the per-connection state machine
//! (pending → authenticated → in-conversation → closed) and owns every
//! mutation of the presence and conversation records. Each transport event is
//! one short-lived unit of work; all cross-event state lives in the store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_db::models::StartOutcome;
use tandem_db::Database;
use tandem_identity::IdentityVerifier;
use tandem_types::events::{GatewayCommand, GatewayEvent};
use tandem_types::models::{
    conversation_id, Conversation, ConversationStatus, PresenceStatus, StoredMessage,
};

use crate::dispatcher::{DeliveryOutcome, Dispatcher};
use crate::error::GatewayError;
use crate::registry::{PushOutcome, Registry};
use crate::store::with_store;

/// Last-message summaries on the conversation record are capped to this many
/// characters.
const SUMMARY_LEN: usize = 80;

pub struct Coordinator {
    db: Arc<Database>,
    verifier: Arc<dyn IdentityVerifier>,
    registry: Registry,
    dispatcher: Dispatcher,
}

impl Coordinator {
    pub fn new(db: Arc<Database>, verifier: Arc<dyn IdentityVerifier>, registry: Registry) -> Self {
        let dispatcher = Dispatcher::new(db.clone(), registry.clone());
        Self {
            db,
            verifier,
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// One inbound transport event. Errors are returned for the connection
    /// loop to surface as an `error` event on the offending connection.
    pub async fn handle_command(
        &self,
        conn_id: Uuid,
        cmd: GatewayCommand,
    ) -> Result<(), GatewayError> {
        match cmd {
            GatewayCommand::Authenticate { token } => self.authenticate(conn_id, &token).await,
            GatewayCommand::StartConversation { peer_id } => {
                self.start_conversation(conn_id, &peer_id).await
            }
            GatewayCommand::SendMessage {
                conversation_id,
                message_id,
                content,
            } => {
                self.send_message(conn_id, &conversation_id, &message_id, content)
                    .await
            }
            GatewayCommand::EndConversation {
                conversation_id,
                reason,
            } => {
                self.end_conversation(conn_id, &conversation_id, reason)
                    .await
            }
            GatewayCommand::UpdatePresence { status } => {
                self.update_presence(conn_id, status).await
            }
            GatewayCommand::UpdateTyping {
                conversation_id,
                is_typing,
            } => {
                self.update_typing(conn_id, &conversation_id, is_typing)
                    .await
            }
            GatewayCommand::SetReady {
                conversation_id,
                ready,
            } => self.set_ready(conn_id, &conversation_id, ready).await,
        }
    }

    /// Bind an identity to a pending connection. The presence upsert
    /// supersedes any previous handle for the user; the superseded connection
    /// is left as an orphan the user record no longer acknowledges. A
    /// successful authenticate also replays queued messages on the fresh
    /// connection.
    async fn authenticate(&self, conn_id: Uuid, token: &str) -> Result<(), GatewayError> {
        let identity = self.verifier.verify(token)?;
        let user_id = identity.user_id;

        if !self.registry.bind(conn_id, &user_id).await {
            return Err(GatewayError::Internal(
                "connection closed during authenticate".into(),
            ));
        }

        let uid = user_id.clone();
        let email = identity.email;
        with_store(&self.db, move |db| {
            db.bind_connection(&uid, email.as_deref(), conn_id, Utc::now())
        })
        .await?;

        info!("{user_id} authenticated on connection {conn_id}");
        self.registry
            .push(
                conn_id,
                GatewayEvent::Authenticated {
                    user_id: user_id.clone(),
                },
            )
            .await;

        self.propagate_presence(&user_id).await;

        // Catch-up failure does not undo a completed authentication; the
        // messages stay queued for the HTTP fetch or the next reconnect.
        match self.dispatcher.catch_up(&user_id, conn_id).await {
            Ok(0) => {}
            Ok(n) => debug!("replayed {n} queued messages to {user_id}"),
            Err(e) => warn!("catch-up for {user_id} failed: {e}"),
        }

        Ok(())
    }

    /// Start (or idempotently re-join) a conversation with a peer. The
    /// deterministic identifier plus create-if-absent makes the double-start
    /// race benign: the loser observes the winner's record as its own
    /// success.
    async fn start_conversation(&self, conn_id: Uuid, peer_id: &str) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        if peer_id.is_empty() {
            return Err(GatewayError::Validation("peerId is required".into()));
        }
        if peer_id == user_id {
            return Err(GatewayError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let peer = peer_id.to_string();
        let peer_presence = with_store(&self.db, move |db| db.get_presence(&peer)).await?;
        if peer_presence.is_none() {
            return Err(GatewayError::PeerNotFound);
        }

        let chat_id = conversation_id(&user_id, peer_id);

        // Claim both participants before creating the record. The claims are
        // conditional writes, so a user already in a different conversation
        // fails here without touching anything else.
        let (uid, cid) = (peer_id.to_string(), chat_id.clone());
        if !with_store(&self.db, move |db| db.claim_conversation(&uid, &cid)).await? {
            return Err(GatewayError::ParticipantBusy);
        }
        let (uid, cid) = (user_id.clone(), chat_id.clone());
        if !with_store(&self.db, move |db| db.claim_conversation(&uid, &cid)).await? {
            let cid = chat_id.clone();
            with_store(&self.db, move |db| db.clear_conversation(&cid)).await?;
            return Err(GatewayError::ParticipantBusy);
        }

        let (cid, uid, pid) = (chat_id.clone(), user_id.clone(), peer_id.to_string());
        let outcome =
            with_store(&self.db, move |db| db.start_chat(&cid, &uid, &pid, Utc::now())).await?;

        let chat = outcome.chat();
        if matches!(outcome, StartOutcome::Created(_)) {
            info!("conversation {} started by {user_id}", chat.id);
        }

        // A re-join of an already-active conversation reports where the pair
        // actually is, not the starting index.
        let uid = user_id.clone();
        let question_index = with_store(&self.db, move |db| db.get_presence(&uid))
            .await?
            .map(|p| p.question_index)
            .unwrap_or(0);

        let event = GatewayEvent::ConversationStarted {
            chat_id: chat.id.clone(),
            participants: vec![chat.initiator_id.clone(), chat.peer_id.clone()],
            question_index,
        };
        self.registry.push(conn_id, event.clone()).await;
        self.notify(peer_id, event).await;

        Ok(())
    }

    /// Append a message to the log and deliver it live or queued. A resend of
    /// an already-stored (conversation, message id) pair re-confirms without
    /// writing or redelivering.
    async fn send_message(
        &self,
        conn_id: Uuid,
        chat_id: &str,
        message_id: &str,
        content: String,
    ) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        if message_id.is_empty() {
            return Err(GatewayError::Validation("messageId is required".into()));
        }
        if content.is_empty() {
            return Err(GatewayError::Validation("content is required".into()));
        }

        let chat = self.load_chat(chat_id).await?;
        if !chat.is_participant(&user_id) {
            return Err(GatewayError::Forbidden);
        }
        // A send that observes the ended record is rejected explicitly; one
        // that interleaved ahead of the end write was already stored and is
        // delivered normally. Nothing is dropped silently.
        if chat.status == ConversationStatus::Ended {
            return Err(GatewayError::ConversationEnded);
        }

        let recipient = chat
            .peer_of(&user_id)
            .ok_or(GatewayError::Forbidden)?
            .to_string();

        let msg = StoredMessage {
            chat_id: chat.id.clone(),
            epoch: chat.epoch,
            message_id: message_id.to_string(),
            sender_id: user_id.clone(),
            recipient_id: recipient,
            content,
            sent_at: Utc::now(),
            queued: true,
        };

        let stored = msg.clone();
        let inserted = with_store(&self.db, move |db| db.insert_message(&stored)).await?;
        if !inserted {
            let (cid, mid) = (chat.id.clone(), message_id.to_string());
            let existing = with_store(&self.db, move |db| db.get_message(&cid, &mid))
                .await?
                .ok_or_else(|| {
                    GatewayError::Internal("duplicate message vanished from log".into())
                })?;
            self.registry
                .push(
                    conn_id,
                    GatewayEvent::MessageConfirmed {
                        chat_id: existing.chat_id,
                        message_id: existing.message_id,
                        sent_at: existing.sent_at,
                        queued: existing.queued,
                    },
                )
                .await;
            return Ok(());
        }

        let outcome = self.dispatcher.deliver(&msg).await?;

        // Summary refresh is best-effort: the message itself is durable.
        let (cid, epoch, summary) = (chat.id.clone(), chat.epoch, summarize(&msg.content));
        if let Err(e) = with_store(&self.db, move |db| {
            db.set_last_message(&cid, epoch, &summary, Utc::now())
        })
        .await
        {
            warn!("last-message summary update for {} failed: {e}", chat.id);
        }

        self.registry
            .push(
                conn_id,
                GatewayEvent::MessageConfirmed {
                    chat_id: msg.chat_id,
                    message_id: msg.message_id,
                    sent_at: msg.sent_at,
                    queued: outcome == DeliveryOutcome::Queued,
                },
            )
            .await;

        Ok(())
    }

    /// End the conversation for both participants. The conditional end update
    /// picks a single winner, so the peer is notified at most once, and both
    /// persisted active-conversation fields are cleared immediately whether
    /// or not the peer is connected.
    async fn end_conversation(
        &self,
        conn_id: Uuid,
        chat_id: &str,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        let chat = self.load_chat(chat_id).await?;
        // Authorization is checked against the persisted pair, never the
        // request body.
        if !chat.is_participant(&user_id) {
            return Err(GatewayError::Forbidden);
        }
        if chat.status == ConversationStatus::Ended {
            return Err(GatewayError::ConversationNotFound);
        }

        let (cid, uid, r) = (chat.id.clone(), user_id.clone(), reason.clone());
        let ended = with_store(&self.db, move |db| {
            db.end_chat(&cid, &uid, r.as_deref(), Utc::now())
        })
        .await?
        .ok_or(GatewayError::ConversationNotFound)?;

        let cid = chat.id.clone();
        with_store(&self.db, move |db| db.clear_conversation(&cid)).await?;

        info!("conversation {} ended by {user_id}", ended.id);

        let event = GatewayEvent::ConversationEnded {
            chat_id: ended.id.clone(),
            ended_by: user_id.clone(),
            reason,
        };
        self.registry.push(conn_id, event.clone()).await;
        let peer = ended
            .peer_of(&user_id)
            .ok_or(GatewayError::Forbidden)?
            .to_string();
        self.notify(&peer, event).await;

        Ok(())
    }

    /// Client-asserted presence. Both directions are conditional on this
    /// handle: offline releases it without closing the socket, online
    /// re-asserts it. A superseded connection loses either write and cannot
    /// clobber the newer session. Peer propagation is best-effort and only
    /// runs when the write actually applied.
    async fn update_presence(
        &self,
        conn_id: Uuid,
        status: PresenceStatus,
    ) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        let uid = user_id.clone();
        let applied = match status {
            PresenceStatus::Offline => {
                with_store(&self.db, move |db| {
                    db.release_connection(&uid, conn_id, Utc::now())
                })
                .await?
            }
            PresenceStatus::Online => {
                with_store(&self.db, move |db| {
                    db.reassert_connection(&uid, conn_id, Utc::now())
                })
                .await?
            }
        };

        if applied {
            self.propagate_presence(&user_id).await;
        } else {
            debug!("{user_id} presence write from superseded handle {conn_id}, ignored");
        }
        Ok(())
    }

    /// Persist the typing flag (conditional on membership) and nudge the peer.
    async fn update_typing(
        &self,
        conn_id: Uuid,
        chat_id: &str,
        is_typing: bool,
    ) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        let (uid, cid) = (user_id.clone(), chat_id.to_string());
        if !with_store(&self.db, move |db| db.set_typing(&uid, &cid, is_typing)).await? {
            return Err(GatewayError::Forbidden);
        }

        if let Some(peer) = self.peer_in_chat(chat_id, &user_id).await? {
            self.notify(
                &peer,
                GatewayEvent::TypingUpdate {
                    chat_id: chat_id.to_string(),
                    user_id,
                    is_typing,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Persist the ready flag. When both participants are ready, a single
    /// conditional write advances both question indexes and clears both
    /// flags, so racing ready calls advance exactly once.
    async fn set_ready(
        &self,
        conn_id: Uuid,
        chat_id: &str,
        ready: bool,
    ) -> Result<(), GatewayError> {
        let user_id = self.require_user(conn_id).await?;

        let (uid, cid) = (user_id.clone(), chat_id.to_string());
        if !with_store(&self.db, move |db| db.set_ready(&uid, &cid, ready)).await? {
            return Err(GatewayError::Forbidden);
        }

        if ready {
            let cid = chat_id.to_string();
            if let Some(index) =
                with_store(&self.db, move |db| db.advance_if_both_ready(&cid)).await?
            {
                info!("conversation {chat_id} advanced to question {index}");
                let event = GatewayEvent::QuestionAdvanced {
                    chat_id: chat_id.to_string(),
                    question_index: index,
                };
                let chat = self.load_chat(chat_id).await?;
                self.notify(&chat.initiator_id, event.clone()).await;
                self.notify(&chat.peer_id, event).await;
                return Ok(());
            }
        }

        if let Some(peer) = self.peer_in_chat(chat_id, &user_id).await? {
            self.notify(
                &peer,
                GatewayEvent::ReadyUpdate {
                    chat_id: chat_id.to_string(),
                    user_id,
                    ready,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Transport-level disconnect. Clears the handle and goes offline only if
    /// this handle is still the bound one; a connection superseded by a newer
    /// authentication is a no-op. An active conversation is NOT ended —
    /// messages keep queuing for the disconnected participant until an
    /// explicit end request.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let Some(user_id) = self.registry.unregister(conn_id).await else {
            debug!("pending connection {conn_id} closed");
            return;
        };

        let uid = user_id.clone();
        match with_store(&self.db, move |db| {
            db.release_connection(&uid, conn_id, Utc::now())
        })
        .await
        {
            Ok(true) => {
                info!("{user_id} disconnected");
                self.propagate_presence(&user_id).await;
            }
            Ok(false) => debug!("{user_id} disconnect for superseded handle {conn_id}, ignored"),
            Err(e) => warn!("presence release for {user_id} failed: {e}"),
        }
    }

    async fn require_user(&self, conn_id: Uuid) -> Result<String, GatewayError> {
        self.registry
            .user_of(conn_id)
            .await
            .ok_or(GatewayError::NotAuthenticated)
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Conversation, GatewayError> {
        let cid = chat_id.to_string();
        with_store(&self.db, move |db| db.current_chat(&cid))
            .await?
            .ok_or(GatewayError::ConversationNotFound)
    }

    /// The other participant of `chat_id`, if `user_id` belongs to it.
    async fn peer_in_chat(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, GatewayError> {
        let chat = self.load_chat(chat_id).await?;
        Ok(chat.peer_of(user_id).map(str::to_string))
    }

    /// Best-effort push to a user's current connection handle. Failures are
    /// logged and swallowed; durable state was already written by the caller.
    async fn notify(&self, user_id: &str, event: GatewayEvent) {
        let uid = user_id.to_string();
        let presence = match with_store(&self.db, move |db| db.get_presence(&uid)).await {
            Ok(p) => p,
            Err(e) => {
                debug!("presence lookup for {user_id} failed during notify: {e}");
                return;
            }
        };
        match presence.and_then(|p| p.connection_id) {
            Some(conn_id) => {
                let outcome = self.registry.push(conn_id, event).await;
                if outcome != PushOutcome::Delivered {
                    debug!("notify {user_id} failed: {outcome:?}");
                }
            }
            None => debug!("notify {user_id} skipped, no live connection"),
        }
    }

    /// Presence propagation per the persisted record: only when the user is
    /// in a conversation, resolve the peer and push a best-effort update.
    async fn propagate_presence(&self, user_id: &str) {
        let uid = user_id.to_string();
        let presence = match with_store(&self.db, move |db| db.get_presence(&uid)).await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                debug!("presence lookup for {user_id} failed during propagation: {e}");
                return;
            }
        };

        let Some(chat_id) = presence.chat_id.clone() else {
            return;
        };
        let peer = match self.peer_in_chat(&chat_id, user_id).await {
            Ok(Some(peer)) => peer,
            Ok(None) => return,
            Err(e) => {
                debug!("peer resolution for {chat_id} failed during propagation: {e}");
                return;
            }
        };

        self.notify(
            &peer,
            GatewayEvent::PresenceUpdate {
                user_id: user_id.to_string(),
                status: presence.status,
                last_seen: presence.last_seen,
            },
        )
        .await;
    }
}

fn summarize(content: &str) -> String {
    content.chars().take(SUMMARY_LEN).collect()
}
