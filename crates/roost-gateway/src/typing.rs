use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use roost_types::events::GatewayEvent;
use roost_types::models::{Conversation, ConversationRef};

use crate::dispatcher::Dispatcher;

/// A typing indicator expires this long after the most recent start.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(3000);

struct TypingEntry {
    conversation: Conversation,
    timer: JoinHandle<()>,
}

/// Per-(user, conversation) typing state with debounced auto-expiry.
///
/// An entry exists exactly while the user is considered typing, and holds
/// the single pending expiry timer for its key. A repeated start aborts the
/// old timer before arming a new one, so a late-firing stale timer can
/// never race a fresh start. Receivers cannot tell an explicit stop from a
/// timer expiry.
#[derive(Clone)]
pub struct TypingTracker {
    dispatcher: Dispatcher,
    inner: Arc<TypingInner>,
}

struct TypingInner {
    entries: Mutex<HashMap<(i64, ConversationRef), TypingEntry>>,
}

impl TypingTracker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            inner: Arc::new(TypingInner {
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Idle -> Typing broadcasts a start; Typing -> Typing only rearms the
    /// timer (no redundant start broadcast).
    pub async fn start(&self, user_id: i64, username: &str, conversation: Conversation) {
        let key = (user_id, conversation.target());

        let mut entries = self.inner.entries.lock().await;
        let fresh = match entries.remove(&key) {
            Some(entry) => {
                entry.timer.abort();
                false
            }
            None => true,
        };

        let tracker = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            tracker.expire(user_id, conversation).await;
        });
        entries.insert(key, TypingEntry { conversation, timer });
        drop(entries);

        if fresh {
            let (channel_id, dm_id) = conversation.target().wire_ids();
            self.deliver(
                user_id,
                GatewayEvent::TypingStart {
                    user_id,
                    username: username.to_string(),
                    channel_id,
                    dm_id,
                },
                &conversation,
            )
            .await;
        }
    }

    /// Explicit stop. Broadcasts even when no entry exists — receivers
    /// treat a stop for an idle user as a no-op.
    pub async fn stop(&self, user_id: i64, conversation: Conversation) {
        let key = (user_id, conversation.target());

        let mut entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.remove(&key) {
            entry.timer.abort();
        }
        drop(entries);

        self.deliver_stop(user_id, &conversation).await;
    }

    /// Timer expiry path. The entry may already be gone if an explicit stop
    /// or disconnect won the race; then there is nothing to announce.
    async fn expire(&self, user_id: i64, conversation: Conversation) {
        let key = (user_id, conversation.target());

        let removed = self.inner.entries.lock().await.remove(&key).is_some();
        if removed {
            self.deliver_stop(user_id, &conversation).await;
        }
    }

    /// Disconnect teardown: cancel every pending timer for the user and
    /// announce the stops now rather than letting orphaned timers fire.
    pub async fn disconnect_cleanup(&self, user_id: i64) {
        let mut entries = self.inner.entries.lock().await;
        let keys: Vec<_> = entries
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .copied()
            .collect();

        let mut conversations = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = entries.remove(&key) {
                entry.timer.abort();
                conversations.push(entry.conversation);
            }
        }
        drop(entries);

        for conversation in conversations {
            self.deliver_stop(user_id, &conversation).await;
        }
    }

    async fn deliver_stop(&self, user_id: i64, conversation: &Conversation) {
        let (channel_id, dm_id) = conversation.target().wire_ids();
        self.deliver(
            user_id,
            GatewayEvent::TypingStop {
                user_id,
                channel_id,
                dm_id,
            },
            conversation,
        )
        .await;
    }

    /// Typing events mirror message addressing, except the originator is
    /// always excluded: room members for channels, the other fixed
    /// participant for DMs.
    async fn deliver(&self, user_id: i64, event: GatewayEvent, conversation: &Conversation) {
        match conversation {
            Conversation::Channel { id } => {
                self.dispatcher.send_to_room(*id, event, Some(user_id)).await;
            }
            Conversation::Direct { .. } => {
                if let Some(peer) = conversation.other_participant(user_id) {
                    self.dispatcher.send_to_user(peer, event).await;
                }
            }
        }
    }
}
