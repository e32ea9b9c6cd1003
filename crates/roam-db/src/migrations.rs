use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY,
            username        TEXT NOT NULL,
            discriminator   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS boards (
            id          INTEGER PRIMARY KEY,
            name        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS roles (
            id          INTEGER PRIMARY KEY,
            board_id    INTEGER NOT NULL REFERENCES boards(id),
            name        TEXT NOT NULL,
            permissions INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_roles_board
            ON roles(board_id);

        -- Role hierarchy edges: stored, never traversed.
        CREATE TABLE IF NOT EXISTS role_parents (
            role_id     INTEGER NOT NULL REFERENCES roles(id),
            parent_id   INTEGER NOT NULL REFERENCES roles(id),
            PRIMARY KEY (role_id, parent_id)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            user_id     INTEGER NOT NULL REFERENCES users(id),
            board_id    INTEGER NOT NULL REFERENCES boards(id),
            role_id     INTEGER NOT NULL REFERENCES roles(id),
            nickname    TEXT,
            PRIMARY KEY (user_id, board_id)
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_board
            ON subscriptions(board_id);

        CREATE TABLE IF NOT EXISTS channels (
            id          INTEGER PRIMARY KEY,
            board_id    INTEGER NOT NULL REFERENCES boards(id),
            name        TEXT NOT NULL,
            topic       TEXT NOT NULL DEFAULT '',
            type        INTEGER NOT NULL DEFAULT 0,
            position    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channels_board
            ON channels(board_id, position);

        -- No timestamp column: the snowflake id carries creation time.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY,
            channel_id  INTEGER NOT NULL REFERENCES channels(id),
            author_id   INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
