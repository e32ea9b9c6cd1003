use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use roam_types::events::GatewayEvent;
use roam_types::models::Snowflake;

/// Receiving end of a session's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<GatewayEvent>>;

/// Maps user ids to their live session and fans events out to them.
///
/// Cloning is cheap; every clone shares the same map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> (conn_id, queue)
    sessions: RwLock<HashMap<Snowflake, (Uuid, mpsc::UnboundedSender<Arc<GatewayEvent>>)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `user_id`. Returns (conn_id, queue).
    ///
    /// An existing session for the same user is replaced; its queue sender
    /// is dropped, which ends that session's delivery loop.
    pub async fn register(&self, user_id: Snowflake) -> (Uuid, EventReceiver) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.inner.sessions.write().await.insert(user_id, (conn_id, tx));
        if let Some((old_conn, _)) = previous {
            info!("Session {} for user {} replaced by {}", old_conn, user_id, conn_id);
        }
        (conn_id, rx)
    }

    /// Remove the session for `user_id`, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: Snowflake, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(&user_id) {
            Some((current, _)) if *current == conn_id => {
                sessions.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Enqueue `event` for every subscriber that has a live session.
    /// Offline subscribers are skipped. Returns the number of sessions the
    /// event was queued for.
    pub async fn publish(&self, event: GatewayEvent, subscribers: &[Snowflake]) -> usize {
        let event = Arc::new(event);
        let sessions = self.inner.sessions.read().await;
        let mut seen = HashSet::with_capacity(subscribers.len());

        let delivered = subscribers
            .iter()
            .filter(|uid| seen.insert(**uid))
            .filter_map(|uid| sessions.get(uid))
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count();

        debug!(
            "{:?} for board {} queued for {}/{} subscribers",
            event.name(),
            event.board_id(),
            delivered,
            subscribers.len()
        );
        delivered
    }

    /// Enqueue `event` for one user, if online.
    pub async fn send_to_user(&self, user_id: Snowflake, event: GatewayEvent) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&user_id) {
            Some((_, tx)) => tx.send(Arc::new(event)).is_ok(),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: Snowflake) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Drop every session's queue. Each session's delivery loop ends and
    /// the session tears itself down.
    pub async fn shutdown(&self) {
        let mut sessions = self.inner.sessions.write().await;
        info!("Closing {} gateway sessions", sessions.len());
        sessions.clear();
    }
}
