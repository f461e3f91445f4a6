//! Database row types — these map directly to SQLite rows.
//! Distinct from roost-types API models to keep the DB layer independent;
//! the one exception is `MessageRecordRow`, which converts into the shared
//! `MessageRecord` since both the gateway and the REST history endpoint
//! deliver the same joined shape.

use chrono::{DateTime, Utc};
use roost_types::models::MessageRecord;
use tracing::warn;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub avatar: Option<String>,
    pub status: String,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
}

pub struct DmRow {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
}

pub struct MessageRow {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub channel_id: Option<i64>,
    pub dm_id: Option<i64>,
}

/// A message joined with its author's profile fields.
pub struct MessageRecordRow {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub author_username: String,
    pub author_avatar: Option<String>,
    pub author_status: String,
    pub channel_id: Option<i64>,
    pub dm_id: Option<i64>,
    pub attachments: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl From<MessageRecordRow> for MessageRecord {
    fn from(row: MessageRecordRow) -> Self {
        let attachments = row
            .attachments
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw).unwrap_or_else(|e| {
                    warn!("Corrupt attachments on message {}: {}", row.id, e);
                    Vec::new()
                })
            })
            .unwrap_or_default();

        MessageRecord {
            id: row.id,
            content: row.content,
            author_id: row.author_id,
            author_username: row.author_username,
            author_avatar: row.author_avatar,
            author_status: row.author_status,
            channel_id: row.channel_id,
            dm_id: row.dm_id,
            attachments,
            created_at: parse_sqlite_timestamp(&row.created_at, row.id),
            edited_at: row
                .edited_at
                .as_deref()
                .map(|ts| parse_sqlite_timestamp(ts, row.id)),
        }
    }
}

fn parse_sqlite_timestamp(raw: &str, message_id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on message {}: {}", raw, message_id, e);
            DateTime::default()
        })
}
