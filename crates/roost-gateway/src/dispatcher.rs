use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use roost_types::events::GatewayEvent;

/// One live session: a user's current connection plus the channel rooms it
/// has explicitly joined. Replaced wholesale on reconnect, so room
/// membership always dies with the connection that created it.
struct Session {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<i64>,
    status: String,
}

/// Maps each user to at most one live connection and routes events to the
/// right set of sessions. Last connect wins; a stale disconnect (or any
/// room mutation from a superseded connection) is ignored via the conn_id
/// guard. Delivery to an absent user is a silent no-op, never an error.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    sessions: RwLock<HashMap<i64, Session>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Install the user's session, replacing any previous one. The old
    /// connection's sender is dropped from the registry but not closed; it
    /// simply stops being reachable. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(
            user_id,
            Session {
                conn_id,
                tx,
                rooms: HashSet::new(),
                status: "online".to_string(),
            },
        );
        (conn_id, rx)
    }

    /// Remove the user's session, but only if this connection still owns it.
    /// Returns whether anything was removed — callers skip the offline
    /// presence transition when a newer connection has taken over.
    pub async fn unregister(&self, user_id: i64, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        if sessions
            .get(&user_id)
            .is_some_and(|s| s.conn_id == conn_id)
        {
            sessions.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self, user_id: i64) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    /// Send a targeted event to a user's current session, if any.
    pub async fn send_to_user(&self, user_id: i64, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(session) = sessions.get(&user_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Broadcast an event to every live session, the sender's included.
    pub async fn broadcast_all(&self, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().await;
        for session in sessions.values() {
            let _ = session.tx.send(event.clone());
        }
    }

    /// Add a channel to the connection's joined set. Guarded by conn_id so
    /// a superseded connection cannot mutate its replacement's rooms.
    pub async fn join_room(&self, user_id: i64, conn_id: Uuid, channel_id: i64) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(&user_id) {
            if session.conn_id == conn_id {
                session.rooms.insert(channel_id);
            }
        }
    }

    /// No-op if the channel was never joined.
    pub async fn leave_room(&self, user_id: i64, conn_id: Uuid, channel_id: i64) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(&user_id) {
            if session.conn_id == conn_id {
                session.rooms.remove(&channel_id);
            }
        }
    }

    /// Users whose current session has joined the channel.
    pub async fn room_members(&self, channel_id: i64) -> Vec<i64> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, s)| s.rooms.contains(&channel_id))
            .map(|(&user_id, _)| user_id)
            .collect()
    }

    /// Deliver to every session joined to the channel, optionally skipping
    /// the originating user (typing events exclude their author; message
    /// events do not).
    pub async fn send_to_room(&self, channel_id: i64, event: GatewayEvent, exclude: Option<i64>) {
        let sessions = self.inner.sessions.read().await;
        for (&user_id, session) in sessions.iter() {
            if Some(user_id) == exclude || !session.rooms.contains(&channel_id) {
                continue;
            }
            let _ = session.tx.send(event.clone());
        }
    }

    /// Update the in-memory status mirror used for presence replay.
    pub async fn set_status(&self, user_id: i64, status: &str) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(&user_id) {
            session.status = status.to_string();
        }
    }

    /// Snapshot of (user_id, status) for every live session, sent to a
    /// freshly connected client so it can render current presence.
    pub async fn presence_snapshot(&self) -> Vec<(i64, String)> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .iter()
            .map(|(&user_id, s)| (user_id, s.status.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> GatewayEvent {
        GatewayEvent::MessageDelete { message_id: 1 }
    }

    #[tokio::test]
    async fn last_connect_wins() {
        let dispatcher = Dispatcher::new();

        let (_conn1, mut rx1) = dispatcher.register(7).await;
        let (_conn2, mut rx2) = dispatcher.register(7).await;

        dispatcher.send_to_user(7, probe()).await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_clear_newer_session() {
        let dispatcher = Dispatcher::new();

        let (conn1, _rx1) = dispatcher.register(7).await;
        let (_conn2, mut rx2) = dispatcher.register(7).await;

        assert!(!dispatcher.unregister(7, conn1).await);
        assert!(dispatcher.is_connected(7).await);

        dispatcher.send_to_user(7, probe()).await;
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_removes_current_session() {
        let dispatcher = Dispatcher::new();

        let (conn, _rx) = dispatcher.register(7).await;
        assert!(dispatcher.unregister(7, conn).await);
        assert!(!dispatcher.is_connected(7).await);

        // Delivering to a gone user is a silent no-op
        dispatcher.send_to_user(7, probe()).await;
    }

    #[tokio::test]
    async fn room_membership_scopes_delivery() {
        let dispatcher = Dispatcher::new();

        let (conn_a, mut rx_a) = dispatcher.register(1).await;
        let (_conn_b, mut rx_b) = dispatcher.register(2).await;

        dispatcher.join_room(1, conn_a, 42).await;
        dispatcher.send_to_room(42, probe(), None).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        let members = dispatcher.room_members(42).await;
        assert_eq!(members, vec![1]);
    }

    #[tokio::test]
    async fn send_to_room_can_exclude_originator() {
        let dispatcher = Dispatcher::new();

        let (conn_a, mut rx_a) = dispatcher.register(1).await;
        let (conn_b, mut rx_b) = dispatcher.register(2).await;
        dispatcher.join_room(1, conn_a, 42).await;
        dispatcher.join_room(2, conn_b, 42).await;

        dispatcher.send_to_room(42, probe(), Some(1)).await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn rooms_die_with_the_connection() {
        let dispatcher = Dispatcher::new();

        let (conn, _rx) = dispatcher.register(1).await;
        dispatcher.join_room(1, conn, 42).await;
        dispatcher.unregister(1, conn).await;

        assert!(dispatcher.room_members(42).await.is_empty());
    }

    #[tokio::test]
    async fn reconnect_starts_with_empty_rooms() {
        let dispatcher = Dispatcher::new();

        let (conn1, _rx1) = dispatcher.register(1).await;
        dispatcher.join_room(1, conn1, 42).await;

        let (_conn2, mut rx2) = dispatcher.register(1).await;
        dispatcher.send_to_room(42, probe(), None).await;
        assert!(rx2.try_recv().is_err());

        // The superseded connection can no longer mutate rooms either
        dispatcher.join_room(1, conn1, 42).await;
        assert!(dispatcher.room_members(42).await.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session() {
        let dispatcher = Dispatcher::new();

        let (_c1, mut rx1) = dispatcher.register(1).await;
        let (_c2, mut rx2) = dispatcher.register(2).await;

        dispatcher.broadcast_all(probe()).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn presence_snapshot_tracks_explicit_status() {
        let dispatcher = Dispatcher::new();

        let (_c1, _rx1) = dispatcher.register(1).await;
        dispatcher.set_status(1, "do not disturb").await;

        let snapshot = dispatcher.presence_snapshot().await;
        assert_eq!(snapshot, vec![(1, "do not disturb".to_string())]);
    }
}
