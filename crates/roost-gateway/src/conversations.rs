use std::sync::Arc;

use roost_db::Database;
use roost_types::models::{Conversation, ConversationRef};

use crate::error::GatewayError;
use crate::run_db;

/// Validate the optional (channel_id, dm_id) pair clients put on the wire.
/// Exactly one must be set.
pub fn conversation_target(
    channel_id: Option<i64>,
    dm_id: Option<i64>,
) -> Result<ConversationRef, GatewayError> {
    match (channel_id, dm_id) {
        (Some(id), None) => Ok(ConversationRef::Channel(id)),
        (None, Some(id)) => Ok(ConversationRef::Direct(id)),
        _ => Err(GatewayError::client(
            "exactly one of channelId or dmId must be set",
        )),
    }
}

/// Confirm a client-supplied conversation reference against the store.
/// An id that matches nothing is a client error, never fatal. Channel-level
/// access control is enforced at the REST layer before a client ever sees
/// a channel id, so the id itself is trusted here.
pub async fn resolve(
    db: &Arc<Database>,
    target: ConversationRef,
) -> Result<Conversation, GatewayError> {
    match target {
        ConversationRef::Channel(id) => {
            let channel = run_db(db, move |db| db.get_channel(id)).await?;
            match channel {
                Some(row) => Ok(Conversation::Channel { id: row.id }),
                None => Err(GatewayError::client("unknown channel")),
            }
        }
        ConversationRef::Direct(id) => {
            let dm = run_db(db, move |db| db.get_dm(id)).await?;
            match dm {
                Some(row) => Ok(Conversation::Direct {
                    id: row.id,
                    participants: (row.user1_id, row.user2_id),
                }),
                None => Err(GatewayError::client("unknown direct message")),
            }
        }
    }
}
