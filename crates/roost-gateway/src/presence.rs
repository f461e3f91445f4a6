use std::sync::Arc;

use roost_db::Database;
use roost_types::events::GatewayEvent;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::run_db;

/// Persists status transitions and announces them network-wide. Presence
/// goes to every live connection, not just the affected user's contacts;
/// narrowing that would change observable behavior.
///
/// A failed status write is logged and otherwise ignored: the in-memory
/// registry stays authoritative for delivery even when the durable status
/// lags.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl PresenceBroadcaster {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub async fn online(&self, user_id: i64) {
        self.publish(user_id, "online").await;
    }

    pub async fn offline(&self, user_id: i64) {
        self.publish(user_id, "offline").await;
    }

    /// Explicit user-initiated status change. The client-supplied value is
    /// stored and broadcast verbatim; no allowed-status set is enforced.
    pub async fn set_status(&self, user_id: i64, status: &str) {
        self.publish(user_id, status).await;
    }

    async fn publish(&self, user_id: i64, status: &str) {
        let persisted = status.to_string();
        if let Err(e) = run_db(&self.db, move |db| {
            db.update_user_status(user_id, &persisted)
        })
        .await
        {
            warn!("Failed to persist status for user {}: {}", user_id, e);
        }

        self.dispatcher.set_status(user_id, status).await;
        self.dispatcher
            .broadcast_all(GatewayEvent::PresenceUpdate {
                user_id,
                status: status.to_string(),
            })
            .await;
    }
}
