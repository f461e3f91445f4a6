use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar      TEXT,
            status      TEXT NOT NULL DEFAULT 'offline',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS servers (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id   INTEGER NOT NULL REFERENCES servers(id),
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS direct_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user1_id    INTEGER NOT NULL REFERENCES users(id),
            user2_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user1_id, user2_id)
        );

        -- AUTOINCREMENT keeps message ids strictly increasing even across
        -- deletes; the id is the only ordering key for delivery and history.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            content     TEXT NOT NULL,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            channel_id  INTEGER REFERENCES channels(id),
            dm_id       INTEGER REFERENCES direct_messages(id),
            attachments TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            edited_at   TEXT,
            CHECK ((channel_id IS NULL) != (dm_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, id);

        CREATE INDEX IF NOT EXISTS idx_messages_dm
            ON messages(dm_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
