pub mod connection;
pub mod conversations;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod presence;
pub mod typing;

use std::sync::Arc;

use roost_db::Database;

use crate::dispatcher::Dispatcher;
use crate::fanout::Fanout;
use crate::presence::PresenceBroadcaster;
use crate::typing::TypingTracker;

/// Everything a live connection needs, assembled once at startup.
/// Owns no global state — construct one per test for a clean slate.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub typing: TypingTracker,
    pub fanout: Fanout,
    pub presence: PresenceBroadcaster,
    pub db: Arc<Database>,
}

impl Gateway {
    pub fn new(db: Arc<Database>) -> Self {
        let dispatcher = Dispatcher::new();
        Self {
            typing: TypingTracker::new(dispatcher.clone()),
            fanout: Fanout::new(db.clone(), dispatcher.clone()),
            presence: PresenceBroadcaster::new(db.clone(), dispatcher.clone()),
            dispatcher,
            db,
        }
    }
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_db<T, F>(db: &Arc<Database>, f: F) -> Result<T, error::GatewayError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::GatewayError::Internal(anyhow::anyhow!("join error: {e}")))?
        .map_err(error::GatewayError::Internal)
}
