use crate::Database;
use crate::models::{ChannelRow, DmRow, MessageRecordRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_SELECT} WHERE username = ?1"))?;
            stmt.query_row([username], map_user).optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_SELECT} WHERE id = ?1"))?;
            stmt.query_row([id], map_user).optional()
        })
    }

    pub fn update_user_status(&self, id: i64, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )?;
            Ok(())
        })
    }

    // -- Servers & channels --

    pub fn create_server(&self, name: &str, owner_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO servers (name, owner_id) VALUES (?1, ?2)",
                rusqlite::params![name, owner_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn create_channel(&self, server_id: i64, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (server_id, name) VALUES (?1, ?2)",
                rusqlite::params![server_id, name],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, server_id, name FROM channels WHERE id = ?1",
                [id],
                |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        server_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn list_channels(&self, server_id: i64) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, server_id, name FROM channels WHERE server_id = ?1")?;
            let rows = stmt
                .query_map([server_id], |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        server_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Direct messages --

    /// Opens a DM between two users, reusing the existing row if one exists
    /// in either participant order.
    pub fn open_dm(&self, user1_id: i64, user2_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM direct_messages
                     WHERE (user1_id = ?1 AND user2_id = ?2)
                        OR (user1_id = ?2 AND user2_id = ?1)",
                    rusqlite::params![user1_id, user2_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok(id);
            }

            conn.execute(
                "INSERT INTO direct_messages (user1_id, user2_id) VALUES (?1, ?2)",
                rusqlite::params![user1_id, user2_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_dm(&self, id: i64) -> Result<Option<DmRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user1_id, user2_id FROM direct_messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(DmRow {
                        id: row.get(0)?,
                        user1_id: row.get(1)?,
                        user2_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        content: &str,
        author_id: i64,
        channel_id: Option<i64>,
        dm_id: Option<i64>,
        attachments: Option<&str>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (content, author_id, channel_id, dm_id, attachments)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![content, author_id, channel_id, dm_id, attachments],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, content, author_id, channel_id, dm_id FROM messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        author_id: row.get(2)?,
                        channel_id: row.get(3)?,
                        dm_id: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// The full delivered shape: message joined with its author's profile.
    pub fn get_message_record(&self, id: i64) -> Result<Option<MessageRecordRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{MESSAGE_RECORD_SELECT} WHERE m.id = ?1"),
                [id],
                map_message_record,
            )
            .optional()
        })
    }

    pub fn update_message_content(&self, id: i64, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?1, edited_at = datetime('now') WHERE id = ?2",
                rusqlite::params![content, id],
            )?;
            Ok(())
        })
    }

    pub fn delete_message(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn channel_messages(
        &self,
        channel_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRecordRow>> {
        self.with_conn(|conn| query_history(conn, "m.channel_id", channel_id, limit, before))
    }

    pub fn dm_messages(
        &self,
        dm_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRecordRow>> {
        self.with_conn(|conn| query_history(conn, "m.dm_id", dm_id, limit, before))
    }
}

// JOIN users to fetch author fields in a single query (eliminates N+1)
const MESSAGE_RECORD_SELECT: &str = "SELECT m.id, m.content, m.author_id, u.username, u.avatar,
        u.status, m.channel_id, m.dm_id, m.attachments, m.created_at, m.edited_at
     FROM messages m
     JOIN users u ON m.author_id = u.id";

fn map_message_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecordRow> {
    Ok(MessageRecordRow {
        id: row.get(0)?,
        content: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row.get(3)?,
        author_avatar: row.get(4)?,
        author_status: row.get(5)?,
        channel_id: row.get(6)?,
        dm_id: row.get(7)?,
        attachments: row.get(8)?,
        created_at: row.get(9)?,
        edited_at: row.get(10)?,
    })
}

/// Newest-first page of a conversation's messages, id-cursor pagination.
fn query_history(
    conn: &Connection,
    column: &str,
    conversation_id: i64,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<MessageRecordRow>> {
    let sql = format!(
        "{MESSAGE_RECORD_SELECT}
         WHERE {column} = ?1 AND m.id < ?2
         ORDER BY m.id DESC
         LIMIT ?3"
    );
    let cursor = before.unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![conversation_id, cursor, limit],
            map_message_record,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

const USER_SELECT: &str =
    "SELECT id, username, password, avatar, status, created_at FROM users";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        avatar: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seeded() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "hash").unwrap();
        let bob = db.create_user("bob", "hash").unwrap();
        let server = db.create_server("test", alice).unwrap();
        let channel = db.create_channel(server, "general").unwrap();
        (db, alice, bob, channel)
    }

    #[test]
    fn message_roundtrip() {
        let (db, alice, _, channel) = seeded();

        let id = db
            .insert_message("hello", alice, Some(channel), None, None)
            .unwrap();
        let record = db.get_message_record(id).unwrap().unwrap();

        assert_eq!(record.content, "hello");
        assert_eq!(record.author_username, "alice");
        assert_eq!(record.author_status, "offline");
        assert_eq!(record.channel_id, Some(channel));
        assert_eq!(record.dm_id, None);
        assert!(record.edited_at.is_none());
    }

    #[test]
    fn message_ids_strictly_increase_across_conversations() {
        let (db, alice, bob, channel) = seeded();
        let dm = db.open_dm(alice, bob).unwrap();

        let first = db
            .insert_message("one", alice, Some(channel), None, None)
            .unwrap();
        let second = db.insert_message("two", bob, None, Some(dm), None).unwrap();
        let third = db
            .insert_message("three", alice, Some(channel), None, None)
            .unwrap();

        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn open_dm_reuses_existing_pair_in_either_order() {
        let (db, alice, bob, _) = seeded();

        let dm = db.open_dm(alice, bob).unwrap();
        assert_eq!(db.open_dm(bob, alice).unwrap(), dm);
    }

    #[test]
    fn edit_sets_edited_at() {
        let (db, alice, _, channel) = seeded();

        let id = db
            .insert_message("typo", alice, Some(channel), None, None)
            .unwrap();
        db.update_message_content(id, "fixed").unwrap();

        let record = db.get_message_record(id).unwrap().unwrap();
        assert_eq!(record.content, "fixed");
        assert!(record.edited_at.is_some());
    }

    #[test]
    fn history_pages_newest_first_by_id() {
        let (db, alice, _, channel) = seeded();

        for i in 0..5 {
            db.insert_message(&format!("m{i}"), alice, Some(channel), None, None)
                .unwrap();
        }

        let page = db.channel_messages(channel, 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m4");
        assert_eq!(page[1].content, "m3");

        let older = db.channel_messages(channel, 10, Some(page[1].id)).unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].content, "m2");
    }

    #[test]
    fn status_update_persists() {
        let (db, alice, _, _) = seeded();

        db.update_user_status(alice, "away").unwrap();
        let user = db.get_user_by_id(alice).unwrap().unwrap();
        assert_eq!(user.status, "away");
    }

    #[test]
    fn message_record_carries_current_author_status() {
        let (db, alice, _, channel) = seeded();

        let id = db
            .insert_message("hello", alice, Some(channel), None, None)
            .unwrap();
        db.update_user_status(alice, "away").unwrap();

        let record = db.get_message_record(id).unwrap().unwrap();
        assert_eq!(record.author_status, "away");
    }
}
