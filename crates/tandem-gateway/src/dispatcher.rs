//! Delivery Dispatcher: push a message to the recipient's live connection or
//! leave it queued, and perform catch-up reads on reconnect. This is the only
//! component that flips the queued flag.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::events::GatewayEvent;
use tandem_types::models::StoredMessage;

use crate::error::GatewayError;
use crate::registry::{PushOutcome, Registry};
use crate::store::with_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    PushedLive,
    Queued,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Database>,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>, registry: Registry) -> Self {
        Self { db, registry }
    }

    /// Attempt live delivery to the recipient, falling back to the queue on a
    /// missing or stale connection handle. The sender's confirmation never
    /// depends on the recipient being reachable.
    pub async fn deliver(&self, msg: &StoredMessage) -> Result<DeliveryOutcome, GatewayError> {
        let recipient = msg.recipient_id.clone();
        let presence = with_store(&self.db, move |db| db.get_presence(&recipient)).await?;

        let Some(conn_id) = presence.and_then(|p| p.connection_id) else {
            return Ok(DeliveryOutcome::Queued);
        };

        match self.registry.push(conn_id, new_message_event(msg)).await {
            PushOutcome::Delivered => {
                let chat_id = msg.chat_id.clone();
                let message_id = msg.message_id.clone();
                with_store(&self.db, move |db| db.mark_delivered(&chat_id, &message_id)).await?;
                Ok(DeliveryOutcome::PushedLive)
            }
            outcome => {
                debug!(
                    "live push to {} failed ({outcome:?}), message {} stays queued",
                    msg.recipient_id, msg.message_id
                );
                Ok(DeliveryOutcome::Queued)
            }
        }
    }

    /// Catch-up read for a freshly authenticated connection: fetch every
    /// queued message addressed to the user and replay them on `conn_id`.
    /// Fetching marks the messages delivered; a crash between fetch and
    /// client receipt can redeliver, which receivers absorb by deduplicating
    /// on (conversation, message id). Returns how many were replayed.
    pub async fn catch_up(&self, user_id: &str, conn_id: Uuid) -> Result<usize, GatewayError> {
        let uid = user_id.to_string();
        let queued = with_store(&self.db, move |db| db.take_queued(&uid)).await?;

        let count = queued.len();
        for msg in &queued {
            let outcome = self.registry.push(conn_id, new_message_event(msg)).await;
            if outcome != PushOutcome::Delivered {
                debug!(
                    "catch-up push of {} to {user_id} failed ({outcome:?})",
                    msg.message_id
                );
            }
        }
        Ok(count)
    }
}

fn new_message_event(msg: &StoredMessage) -> GatewayEvent {
    GatewayEvent::NewMessage {
        chat_id: msg.chat_id.clone(),
        message_id: msg.message_id.clone(),
        sender_id: msg.sender_id.clone(),
        content: msg.content.clone(),
        sent_at: msg.sent_at,
    }
}
