use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
}

/// A message as delivered to clients and returned from history queries.
/// Author fields are joined in from the users table; exactly one of
/// `channel_id` / `dm_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub author_username: String,
    pub author_avatar: Option<String>,
    pub author_status: String,
    pub channel_id: Option<i64>,
    pub dm_id: Option<i64>,
    pub attachments: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Client-supplied reference to a conversation, before the store has
/// confirmed it exists. Channels and DMs live in separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationRef {
    Channel(i64),
    Direct(i64),
}

impl ConversationRef {
    /// Splits back into the optional (channel_id, dm_id) pair used on the wire.
    pub fn wire_ids(&self) -> (Option<i64>, Option<i64>) {
        match self {
            Self::Channel(id) => (Some(*id), None),
            Self::Direct(id) => (None, Some(*id)),
        }
    }
}

/// A conversation confirmed against the store. Channels have room
/// semantics; DMs address exactly two fixed participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversation {
    Channel { id: i64 },
    Direct { id: i64, participants: (i64, i64) },
}

impl Conversation {
    pub fn target(&self) -> ConversationRef {
        match self {
            Self::Channel { id } => ConversationRef::Channel(*id),
            Self::Direct { id, .. } => ConversationRef::Direct(*id),
        }
    }

    /// For a DM, the participant that is not `user_id`. For a two-party
    /// self-DM both sides are the same user.
    pub fn other_participant(&self, user_id: i64) -> Option<i64> {
        match self {
            Self::Channel { .. } => None,
            Self::Direct { participants: (a, b), .. } => {
                Some(if *a == user_id { *b } else { *a })
            }
        }
    }
}
