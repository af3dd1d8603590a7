use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use piggies_types::events::GatewayEvent;

type UserSender = mpsc::UnboundedSender<GatewayEvent>;

/// Routes events to connected users. A user may hold several connections
/// (phone and browser); each gets every event addressed to the user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Per-user targeted send channels: user_id -> [(conn_id, sender)]
    user_channels: RwLock<HashMap<Uuid, Vec<(Uuid, UserSender)>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user. Returns (conn_id, receiver) and
    /// whether this is the user's first live connection.
    pub async fn register(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.inner.user_channels.write().await;
        let conns = channels.entry(user_id).or_default();
        let first = conns.is_empty();
        conns.push((conn_id, tx));
        (conn_id, rx, first)
    }

    /// Drop one connection. Returns true when the user has no connections left.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.inner.user_channels.write().await;
        let Some(conns) = channels.get_mut(&user_id) else {
            return true;
        };
        conns.retain(|(id, _)| *id != conn_id);
        if conns.is_empty() {
            channels.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Fire-and-forget delivery to every connection of `user_id`. Users
    /// without a live connection simply miss the event.
    pub async fn notify(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some(conns) => {
                for (_, tx) in conns {
                    let _ = tx.send(event.clone());
                }
            }
            None => trace!("User {} offline, dropping event", user_id),
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.user_channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_reaches_every_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_, mut phone, first) = dispatcher.register(user).await;
        let (_, mut browser, second) = dispatcher.register(user).await;
        assert!(first);
        assert!(!second);

        dispatcher.notify(user, GatewayEvent::Ready { user_id: user }).await;
        assert!(matches!(phone.recv().await, Some(GatewayEvent::Ready { .. })));
        assert!(matches!(browser.recv().await, Some(GatewayEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_unregister_tracks_last_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (a, _rx_a, _) = dispatcher.register(user).await;
        let (b, _rx_b, _) = dispatcher.register(user).await;

        assert!(!dispatcher.unregister(user, a).await);
        assert!(dispatcher.is_connected(user).await);
        assert!(dispatcher.unregister(user, b).await);
        assert!(!dispatcher.is_connected(user).await);
        assert_eq!(dispatcher.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_notify_offline_user_is_noop() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        dispatcher.notify(user, GatewayEvent::Ready { user_id: user }).await;
    }
}
