use std::sync::Arc;

use anyhow::anyhow;
use roost_db::Database;
use roost_types::events::GatewayEvent;
use roost_types::models::{Conversation, ConversationRef, MessageRecord};

use crate::conversations;
use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::run_db;

/// Persist-then-deliver orchestration for message create/edit/delete.
///
/// The acting user's identity comes from the connection, never from the
/// payload, and edits/deletes are authorized against the stored author row.
/// Addressing for edit/delete is resolved from the message's own stored
/// conversation reference. The store's strictly increasing message id is
/// the only ordering key, so concurrent senders observe one total order.
#[derive(Clone)]
pub struct Fanout {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl Fanout {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub async fn send(
        &self,
        author_id: i64,
        target: ConversationRef,
        content: String,
        attachments: Option<Vec<serde_json::Value>>,
    ) -> Result<MessageRecord, GatewayError> {
        // Unknown conversation is a client error; nothing is persisted
        let conversation = conversations::resolve(&self.db, target).await?;

        let attachments_json = attachments
            .map(|a| serde_json::to_string(&a))
            .transpose()
            .map_err(|e| GatewayError::Internal(anyhow!("attachments encode: {e}")))?;

        let (channel_id, dm_id) = target.wire_ids();
        let message_id = run_db(&self.db, move |db| {
            db.insert_message(
                &content,
                author_id,
                channel_id,
                dm_id,
                attachments_json.as_deref(),
            )
        })
        .await?;

        let record = self.load_record(message_id).await?;
        self.deliver(
            author_id,
            &conversation,
            GatewayEvent::MessageCreate {
                message: record.clone(),
            },
        )
        .await;

        Ok(record)
    }

    pub async fn edit(
        &self,
        author_id: i64,
        message_id: i64,
        content: String,
    ) -> Result<MessageRecord, GatewayError> {
        let conversation = self.authorize(author_id, message_id, "edit").await?;

        run_db(&self.db, move |db| {
            db.update_message_content(message_id, &content)
        })
        .await?;

        let record = self.load_record(message_id).await?;
        self.deliver(
            author_id,
            &conversation,
            GatewayEvent::MessageUpdate {
                message: record.clone(),
            },
        )
        .await;

        Ok(record)
    }

    /// Recipients get a deletion marker carrying the id only; no content is
    /// echoed back.
    pub async fn delete(&self, author_id: i64, message_id: i64) -> Result<(), GatewayError> {
        let conversation = self.authorize(author_id, message_id, "delete").await?;

        run_db(&self.db, move |db| db.delete_message(message_id)).await?;

        self.deliver(
            author_id,
            &conversation,
            GatewayEvent::MessageDelete { message_id },
        )
        .await;

        Ok(())
    }

    /// Loads the stored message, rejects anyone but its author, and resolves
    /// the conversation from the stored row rather than client input. A
    /// missing message gets the same client error as a foreign one.
    async fn authorize(
        &self,
        author_id: i64,
        message_id: i64,
        action: &str,
    ) -> Result<Conversation, GatewayError> {
        let row = run_db(&self.db, move |db| db.get_message(message_id)).await?;

        let row = match row {
            Some(row) if row.author_id == author_id => row,
            _ => return Err(GatewayError::client(format!("cannot {action} message"))),
        };

        let target = conversations::conversation_target(row.channel_id, row.dm_id)?;
        conversations::resolve(&self.db, target).await
    }

    async fn load_record(&self, message_id: i64) -> Result<MessageRecord, GatewayError> {
        let row = run_db(&self.db, move |db| db.get_message_record(message_id))
            .await?
            .ok_or_else(|| GatewayError::Internal(anyhow!("message {message_id} vanished")))?;
        Ok(row.into())
    }

    /// Channel events go to current room members (the sender included iff it
    /// joined). DM events echo to the sender's own session and, if live, the
    /// other participant's. An unreachable recipient is a silent no-op.
    async fn deliver(&self, author_id: i64, conversation: &Conversation, event: GatewayEvent) {
        match conversation {
            Conversation::Channel { id } => {
                self.dispatcher.send_to_room(*id, event, None).await;
            }
            Conversation::Direct { .. } => {
                self.dispatcher.send_to_user(author_id, event.clone()).await;
                if let Some(peer) = conversation.other_participant(author_id) {
                    if peer != author_id {
                        self.dispatcher.send_to_user(peer, event).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        db: Arc<Database>,
        dispatcher: Dispatcher,
        fanout: Fanout,
        alice: i64,
        bob: i64,
        carol: i64,
        channel: i64,
        dm: i64,
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "hash").unwrap();
        let bob = db.create_user("bob", "hash").unwrap();
        let carol = db.create_user("carol", "hash").unwrap();
        let server = db.create_server("test", alice).unwrap();
        let channel = db.create_channel(server, "general").unwrap();
        let dm = db.open_dm(alice, bob).unwrap();

        let dispatcher = Dispatcher::new();
        let fanout = Fanout::new(db.clone(), dispatcher.clone());
        Harness {
            db,
            dispatcher,
            fanout,
            alice,
            bob,
            carol,
            channel,
            dm,
        }
    }

    #[tokio::test]
    async fn channel_message_reaches_room_members_only() {
        let h = harness();
        let (conn_a, mut rx_a) = h.dispatcher.register(h.alice).await;
        let (_conn_b, mut rx_b) = h.dispatcher.register(h.bob).await;
        let (_conn_c, mut rx_c) = h.dispatcher.register(h.carol).await;

        // Alice joined; Bob sends without joining; Carol never joined
        h.dispatcher.join_room(h.alice, conn_a, h.channel).await;

        h.fanout
            .send(
                h.bob,
                ConversationRef::Channel(h.channel),
                "hi".into(),
                None,
            )
            .await
            .unwrap();

        match rx_a.try_recv().unwrap() {
            GatewayEvent::MessageCreate { message } => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.author_id, h.bob);
                assert_eq!(message.author_username, "bob");
                assert_eq!(message.channel_id, Some(h.channel));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn dm_message_echoes_to_sender_and_peer_only() {
        let h = harness();
        let (_conn_a, mut rx_a) = h.dispatcher.register(h.alice).await;
        let (_conn_b, mut rx_b) = h.dispatcher.register(h.bob).await;
        let (_conn_c, mut rx_c) = h.dispatcher.register(h.carol).await;

        h.fanout
            .send(h.alice, ConversationRef::Direct(h.dm), "psst".into(), None)
            .await
            .unwrap();

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            GatewayEvent::MessageCreate { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            GatewayEvent::MessageCreate { .. }
        ));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn dm_send_with_peer_offline_still_echoes_to_sender() {
        let h = harness();
        let (_conn_a, mut rx_a) = h.dispatcher.register(h.alice).await;

        h.fanout
            .send(h.alice, ConversationRef::Direct(h.dm), "hello?".into(), None)
            .await
            .unwrap();

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            GatewayEvent::MessageCreate { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_conversation_is_client_error_and_persists_nothing() {
        let h = harness();

        let err = h
            .fanout
            .send(h.alice, ConversationRef::Channel(999), "void".into(), None)
            .await
            .unwrap_err();
        assert!(err.is_client());

        assert!(h.db.get_message(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn edit_by_non_author_rejected_and_content_unchanged() {
        let h = harness();

        let record = h
            .fanout
            .send(
                h.alice,
                ConversationRef::Channel(h.channel),
                "original".into(),
                None,
            )
            .await
            .unwrap();

        let err = h
            .fanout
            .edit(h.bob, record.id, "hijacked".into())
            .await
            .unwrap_err();
        assert!(err.is_client());

        let stored = h.db.get_message(record.id).unwrap().unwrap();
        assert_eq!(stored.content, "original");
    }

    #[tokio::test]
    async fn edit_redelivers_to_stored_conversation() {
        let h = harness();
        let (_conn_b, mut rx_b) = h.dispatcher.register(h.bob).await;

        let record = h
            .fanout
            .send(h.alice, ConversationRef::Direct(h.dm), "typo".into(), None)
            .await
            .unwrap();
        let _ = rx_b.try_recv();

        // The edit command carries only the message id; addressing comes
        // from the stored row
        let edited = h.fanout.edit(h.alice, record.id, "fixed".into()).await.unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited_at.is_some());

        match rx_b.try_recv().unwrap() {
            GatewayEvent::MessageUpdate { message } => assert_eq!(message.content, "fixed"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_announces_id_only_and_removes_row() {
        let h = harness();
        let (conn_b, mut rx_b) = h.dispatcher.register(h.bob).await;
        h.dispatcher.join_room(h.bob, conn_b, h.channel).await;

        let record = h
            .fanout
            .send(
                h.alice,
                ConversationRef::Channel(h.channel),
                "oops".into(),
                None,
            )
            .await
            .unwrap();
        let _ = rx_b.try_recv();

        h.fanout.delete(h.alice, record.id).await.unwrap();

        match rx_b.try_recv().unwrap() {
            GatewayEvent::MessageDelete { message_id } => assert_eq!(message_id, record.id),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(h.db.get_message(record.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_foreign_message_rejected() {
        let h = harness();

        let record = h
            .fanout
            .send(
                h.alice,
                ConversationRef::Channel(h.channel),
                "mine".into(),
                None,
            )
            .await
            .unwrap();

        let err = h.fanout.delete(h.bob, record.id).await.unwrap_err();
        assert!(err.is_client());
        assert!(h.db.get_message(record.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn store_ids_order_messages_across_conversations() {
        let h = harness();

        let first = h
            .fanout
            .send(
                h.alice,
                ConversationRef::Channel(h.channel),
                "one".into(),
                None,
            )
            .await
            .unwrap();
        let second = h
            .fanout
            .send(h.bob, ConversationRef::Direct(h.dm), "two".into(), None)
            .await
            .unwrap();

        assert!(second.id > first.id);

        // A history read straight after the send sees the same record,
        // ordered by the same store-assigned id
        let history = h.db.channel_messages(h.channel, 50, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].content, "one");
    }

    #[tokio::test]
    async fn attachments_round_trip_opaquely() {
        let h = harness();

        let attachments = vec![serde_json::json!({"url": "a.png", "size": 123})];
        let record = h
            .fanout
            .send(
                h.alice,
                ConversationRef::Channel(h.channel),
                "with file".into(),
                Some(attachments.clone()),
            )
            .await
            .unwrap();

        assert_eq!(record.attachments, attachments);
    }
}
