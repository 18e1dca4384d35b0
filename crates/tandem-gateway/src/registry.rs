//! Connection Registry: maps live connection handles to their outbound
//! channels and authentication state. Durable presence lives in the store;
//! this is the process-local view of which sockets are actually here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use tandem_types::events::GatewayEvent;

/// Result of a push attempt, so callers decide policy instead of a catch-all:
/// the dispatcher queues on anything short of Delivered, presence propagation
/// logs and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// No such connection handle (never registered, or already gone).
    Unreachable,
    /// The handle exists but its outbound channel is closed.
    TransportError,
}

struct ConnEntry {
    user_id: Option<String>,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    conns: RwLock<HashMap<Uuid, ConnEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                conns: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Accept a connection in pending state. Always succeeds.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .conns
            .write()
            .await
            .insert(conn_id, ConnEntry { user_id: None, tx });
        (conn_id, rx)
    }

    /// Bind an identity to a pending connection. Returns false when the
    /// connection is already gone.
    pub async fn bind(&self, conn_id: Uuid, user_id: &str) -> bool {
        let mut conns = self.inner.conns.write().await;
        match conns.get_mut(&conn_id) {
            Some(entry) => {
                entry.user_id = Some(user_id.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn user_of(&self, conn_id: Uuid) -> Option<String> {
        self.inner
            .conns
            .read()
            .await
            .get(&conn_id)
            .and_then(|entry| entry.user_id.clone())
    }

    /// Drop a connection. Returns the identity it was bound to, if any.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<String> {
        self.inner
            .conns
            .write()
            .await
            .remove(&conn_id)
            .and_then(|entry| entry.user_id)
    }

    pub async fn push(&self, conn_id: Uuid, event: GatewayEvent) -> PushOutcome {
        let conns = self.inner.conns.read().await;
        match conns.get(&conn_id) {
            Some(entry) => {
                if entry.tx.send(event).is_ok() {
                    PushOutcome::Delivered
                } else {
                    PushOutcome::TransportError
                }
            }
            None => PushOutcome::Unreachable,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_connection_has_no_identity() {
        let registry = Registry::new();
        let (conn_id, _rx) = registry.register().await;
        assert_eq!(registry.user_of(conn_id).await, None);

        assert!(registry.bind(conn_id, "u1").await);
        assert_eq!(registry.user_of(conn_id).await.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn push_reports_tri_state() {
        let registry = Registry::new();
        let (conn_id, mut rx) = registry.register().await;

        let event = GatewayEvent::Error {
            error: "probe".into(),
        };
        assert_eq!(
            registry.push(conn_id, event.clone()).await,
            PushOutcome::Delivered
        );
        assert!(rx.recv().await.is_some());

        // Receiver dropped: the handle is still registered but dead.
        drop(rx);
        assert_eq!(
            registry.push(conn_id, event.clone()).await,
            PushOutcome::TransportError
        );

        registry.unregister(conn_id).await;
        assert_eq!(registry.push(conn_id, event).await, PushOutcome::Unreachable);
    }

    #[tokio::test]
    async fn unregister_returns_bound_identity() {
        let registry = Registry::new();
        let (conn_id, _rx) = registry.register().await;
        registry.bind(conn_id, "u1").await;

        assert_eq!(registry.unregister(conn_id).await.as_deref(), Some("u1"));
        assert_eq!(registry.unregister(conn_id).await, None);
    }
}
