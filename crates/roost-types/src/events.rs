use serde::{Deserialize, Serialize};

use crate::models::MessageRecord;

/// Events sent over the WebSocket gateway, server -> client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: i64, username: String },

    /// A new message was posted in a conversation the client can see
    MessageCreate { message: MessageRecord },

    /// A message was edited by its author
    MessageUpdate { message: MessageRecord },

    /// A message was deleted by its author; only the id is echoed back
    MessageDelete { message_id: i64 },

    /// A user started typing in a conversation
    TypingStart {
        user_id: i64,
        username: String,
        channel_id: Option<i64>,
        dm_id: Option<i64>,
    },

    /// A user stopped typing (explicit stop and timer expiry look identical)
    TypingStop {
        user_id: i64,
        channel_id: Option<i64>,
        dm_id: Option<i64>,
    },

    /// A user's status changed (connect, disconnect, or explicit set-status)
    PresenceUpdate { user_id: i64, status: String },

    /// Request failed; delivered only to the originating connection
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection; must be the first frame
    Identify { token: String },

    /// Post a message into a channel or DM (exactly one id must be set)
    SendMessage {
        content: String,
        channel_id: Option<i64>,
        dm_id: Option<i64>,
        #[serde(default)]
        attachments: Option<Vec<serde_json::Value>>,
    },

    /// Replace the content of one of the sender's own messages
    EditMessage { message_id: i64, content: String },

    /// Delete one of the sender's own messages
    DeleteMessage { message_id: i64 },

    /// Indicate typing in a conversation
    TypingStart {
        channel_id: Option<i64>,
        dm_id: Option<i64>,
    },

    /// Explicitly stop the typing indicator
    TypingStop {
        channel_id: Option<i64>,
        dm_id: Option<i64>,
    },

    /// Start receiving broadcasts for a channel
    JoinChannel { channel_id: i64 },

    /// Stop receiving broadcasts for a channel
    LeaveChannel { channel_id: i64 },

    /// Set the user's presence status (stored and broadcast verbatim)
    SetStatus { status: String },
}
