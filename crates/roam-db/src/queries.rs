use std::collections::HashMap;

use crate::models::{ChannelChanges, NewBoard, NewChannel};
use crate::Database;
use anyhow::{Result, bail};
use rusqlite::{Connection, Row, params};
use tracing::info;

use roam_types::events::BoardSnapshot;
use roam_types::models::{Board, Channel, EVERYONE_ROLE, Message, OWNER_ROLE, Role, Snowflake, User};
use roam_types::pagination::{Anchor, Cursor};
use roam_types::permissions::Permissions;

const CHANNEL_COLUMNS: &str = "c.id, c.board_id, c.name, c.topic, c.type, c.position,
     (SELECT MAX(m.id) FROM messages m WHERE m.channel_id = c.id)";

const MESSAGE_COLUMNS: &str = "m.id, m.channel_id, c.board_id, u.id, u.username, u.discriminator, m.content
     FROM messages m
     JOIN channels c ON c.id = m.channel_id
     JOIN users u ON u.id = m.author_id";

impl Database {
    // -- Users --

    /// Insert the user if unknown; an existing profile is left untouched.
    pub fn ensure_user(&self, id: Snowflake, username: &str, discriminator: &str) -> Result<User> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (id, username, discriminator) VALUES (?1, ?2, ?3)",
                params![id, username, discriminator],
            )?;
            query_user(conn, id)?.ok_or_else(|| anyhow::anyhow!("User vanished: {}", id))
        })
    }

    pub fn get_user(&self, id: Snowflake) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn rename_user(&self, id: Snowflake, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET username = ?2 WHERE id = ?1", params![id, username])?;
            query_user(conn, id)
        })
    }

    // -- Boards --

    /// Create a board with its `Owner` and `everyone` roles and a `general`
    /// channel, and subscribe the creator as owner.
    pub fn create_board(&self, new: &NewBoard) -> Result<Board> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO boards (id, name) VALUES (?1, ?2)",
                params![new.id, new.name],
            )?;
            tx.execute(
                "INSERT INTO roles (id, board_id, name, permissions) VALUES (?1, ?2, ?3, ?4)",
                params![new.owner_role_id, new.id, OWNER_ROLE, Permissions::OWNER.0 as i64],
            )?;
            tx.execute(
                "INSERT INTO roles (id, board_id, name, permissions) VALUES (?1, ?2, ?3, ?4)",
                params![
                    new.everyone_role_id,
                    new.id,
                    EVERYONE_ROLE,
                    Permissions::EVERYONE_DEFAULT.0 as i64
                ],
            )?;
            tx.execute(
                "INSERT INTO role_parents (role_id, parent_id) VALUES (?1, ?2)",
                params![new.everyone_role_id, new.owner_role_id],
            )?;
            tx.execute(
                "INSERT INTO channels (id, board_id, name, topic, type, position)
                 VALUES (?1, ?2, 'general', 'general discussion', 0, 0)",
                params![new.general_channel_id, new.id],
            )?;
            tx.execute(
                "INSERT INTO subscriptions (user_id, board_id, role_id) VALUES (?1, ?2, ?3)",
                params![new.creator_id, new.id, new.owner_role_id],
            )?;
            Ok(Board {
                id: new.id,
                name: new.name.clone(),
            })
        })
    }

    pub fn get_board(&self, id: Snowflake) -> Result<Option<Board>> {
        self.with_conn(|conn| query_board(conn, id))
    }

    pub fn rename_board(&self, id: Snowflake, name: &str) -> Result<Option<Board>> {
        self.with_conn(|conn| {
            conn.execute("UPDATE boards SET name = ?2 WHERE id = ?1", params![id, name])?;
            query_board(conn, id)
        })
    }

    /// Ids of every board `user_id` is subscribed to.
    pub fn boards_of_user(&self, user_id: Snowflake) -> Result<Vec<Snowflake>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT board_id FROM subscriptions WHERE user_id = ?1 ORDER BY board_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn subscribers(&self, board_id: Snowflake) -> Result<Vec<Snowflake>> {
        self.with_conn(|conn| query_subscribers(conn, board_id))
    }

    /// Subscribers currently holding the board's `Owner` role.
    pub fn owner_ids(&self, board_id: Snowflake) -> Result<Vec<Snowflake>> {
        self.with_conn(|conn| query_owner_ids(conn, board_id))
    }

    /// Subscribe `user_id` to a board with the given role. The role must
    /// belong to that board.
    pub fn subscribe(
        &self,
        user_id: Snowflake,
        board_id: Snowflake,
        role_id: Snowflake,
        nickname: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            match query_role(conn, role_id)? {
                Some(role) if role.board_id == board_id => {}
                _ => bail!("Role {} does not belong to board {}", role_id, board_id),
            }
            conn.execute(
                "INSERT INTO subscriptions (user_id, board_id, role_id, nickname)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, board_id) DO UPDATE SET role_id = ?3, nickname = ?4",
                params![user_id, board_id, role_id, nickname],
            )?;
            Ok(())
        })
    }

    /// The role assigned on the user's subscription edge, if subscribed.
    pub fn subscription_role(&self, user_id: Snowflake, board_id: Snowflake) -> Result<Option<Role>> {
        self.with_conn(|conn| {
            let role_id: Option<Snowflake> = conn
                .query_row(
                    "SELECT role_id FROM subscriptions WHERE user_id = ?1 AND board_id = ?2",
                    params![user_id, board_id],
                    |row| row.get(0),
                )
                .optional()?;
            match role_id {
                Some(role_id) => query_role(conn, role_id),
                None => Ok(None),
            }
        })
    }

    /// Board state for a BOARD_CREATE / BOARD_UPDATE event.
    pub fn board_snapshot(&self, board_id: Snowflake) -> Result<Option<BoardSnapshot>> {
        self.with_conn(|conn| {
            let Some(board) = query_board(conn, board_id)? else {
                return Ok(None);
            };
            Ok(Some(BoardSnapshot {
                board,
                channels: query_channels_of_board(conn, board_id)?,
                roles: query_roles_of_board(conn, board_id)?,
                owner_ids: query_owner_ids(conn, board_id)?,
            }))
        })
    }

    /// Remove a board and everything it owns. Returns false if it did not exist.
    pub fn delete_board_cascade(&self, board_id: Snowflake) -> Result<bool> {
        let deleted = self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM role_parents
                 WHERE role_id IN (SELECT id FROM roles WHERE board_id = ?1)
                    OR parent_id IN (SELECT id FROM roles WHERE board_id = ?1)",
                [board_id],
            )?;
            tx.execute("DELETE FROM subscriptions WHERE board_id = ?1", [board_id])?;
            tx.execute("DELETE FROM roles WHERE board_id = ?1", [board_id])?;
            tx.execute(
                "DELETE FROM messages
                 WHERE channel_id IN (SELECT id FROM channels WHERE board_id = ?1)",
                [board_id],
            )?;
            tx.execute("DELETE FROM channels WHERE board_id = ?1", [board_id])?;
            let n = tx.execute("DELETE FROM boards WHERE id = ?1", [board_id])?;
            Ok(n > 0)
        })?;
        if deleted {
            info!("Board {} deleted with all roles, channels and messages", board_id);
        }
        Ok(deleted)
    }

    // -- Roles --

    pub fn roles_of_board(&self, board_id: Snowflake) -> Result<Vec<Role>> {
        self.with_conn(|conn| query_roles_of_board(conn, board_id))
    }

    pub fn get_role(&self, id: Snowflake) -> Result<Option<Role>> {
        self.with_conn(|conn| query_role(conn, id))
    }

    // -- Channels --

    pub fn create_channel(&self, new: &NewChannel) -> Result<Channel> {
        self.with_conn(|conn| {
            let position = match new.position {
                Some(p) => p,
                None => conn.query_row(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE board_id = ?1",
                    [new.board_id],
                    |row| row.get(0),
                )?,
            };
            conn.execute(
                "INSERT INTO channels (id, board_id, name, topic, type, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new.id, new.board_id, new.name, new.topic, new.kind, position],
            )?;
            query_channel(conn, new.id)?.ok_or_else(|| anyhow::anyhow!("Channel vanished: {}", new.id))
        })
    }

    pub fn get_channel(&self, id: Snowflake) -> Result<Option<Channel>> {
        self.with_conn(|conn| query_channel(conn, id))
    }

    /// Channels of a board, ordered by position.
    pub fn channels_of_board(&self, board_id: Snowflake) -> Result<Vec<Channel>> {
        self.with_conn(|conn| query_channels_of_board(conn, board_id))
    }

    pub fn update_channel(&self, id: Snowflake, changes: &ChannelChanges) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE channels SET
                    name = COALESCE(?2, name),
                    topic = COALESCE(?3, topic),
                    position = COALESCE(?4, position)
                 WHERE id = ?1",
                params![id, changes.name, changes.topic, changes.position],
            )?;
            query_channel(conn, id)
        })
    }

    /// Apply a batch of position moves. Every id must be a channel of
    /// `board_id`; otherwise nothing is written. Channels come back in the
    /// order the moves were given.
    pub fn set_channel_positions(
        &self,
        board_id: Snowflake,
        moves: &[(Snowflake, i64)],
    ) -> Result<Vec<Channel>> {
        self.with_tx(|tx| {
            let mut moved = Vec::with_capacity(moves.len());
            for &(channel_id, position) in moves {
                let n = tx.execute(
                    "UPDATE channels SET position = ?3 WHERE id = ?1 AND board_id = ?2",
                    params![channel_id, board_id, position],
                )?;
                if n == 0 {
                    bail!("Channel {} is not part of board {}", channel_id, board_id);
                }
                if let Some(channel) = query_channel(tx, channel_id)? {
                    moved.push(channel);
                }
            }
            Ok(moved)
        })
    }

    /// Delete a channel and its messages, returning it as it was.
    pub fn delete_channel(&self, id: Snowflake) -> Result<Option<Channel>> {
        self.with_tx(|tx| {
            let Some(channel) = query_channel(tx, id)? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM messages WHERE channel_id = ?1", [id])?;
            tx.execute("DELETE FROM channels WHERE id = ?1", [id])?;
            Ok(Some(channel))
        })
    }

    // -- Messages --

    pub fn create_message(
        &self,
        id: Snowflake,
        channel_id: Snowflake,
        author_id: Snowflake,
        content: &str,
    ) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                params![id, channel_id, author_id, content],
            )?;
            query_message(conn, channel_id, id)?.ok_or_else(|| anyhow::anyhow!("Message vanished: {}", id))
        })
    }

    pub fn get_message(&self, channel_id: Snowflake, id: Snowflake) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, channel_id, id))
    }

    /// One history window of a channel, oldest first.
    pub fn messages_page(&self, channel_id: Snowflake, cursor: &Cursor) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let limit = cursor.limit as i64;
            let messages = match cursor.anchor {
                Anchor::Latest => newest_below(conn, channel_id, Snowflake::MAX, limit)?,
                Anchor::Before(x) => newest_below(conn, channel_id, x, limit)?,
                Anchor::After(x) => oldest_above(conn, channel_id, x, limit)?,
                Anchor::Around(x) => {
                    let half = cursor.half() as i64;
                    let mut window = newest_below(conn, channel_id, x, half)?;
                    window.extend(oldest_above(conn, channel_id, x, half)?);
                    window
                }
            };
            Ok(messages)
        })
    }
}

fn query_user(conn: &Connection, id: Snowflake) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, username, discriminator FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    discriminator: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_board(conn: &Connection, id: Snowflake) -> Result<Option<Board>> {
    let row = conn
        .query_row("SELECT id, name FROM boards WHERE id = ?1", [id], |row| {
            Ok(Board {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_subscribers(conn: &Connection, board_id: Snowflake) -> Result<Vec<Snowflake>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM subscriptions WHERE board_id = ?1 ORDER BY user_id")?;
    let ids = stmt
        .query_map([board_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn query_owner_ids(conn: &Connection, board_id: Snowflake) -> Result<Vec<Snowflake>> {
    let mut stmt = conn.prepare(
        "SELECT s.user_id FROM subscriptions s
         JOIN roles r ON r.id = s.role_id
         WHERE s.board_id = ?1 AND r.board_id = ?1 AND r.name = ?2
         ORDER BY s.user_id",
    )?;
    let ids = stmt
        .query_map(params![board_id, OWNER_ROLE], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        permissions: row.get::<_, i64>(3)? as u64,
        parent_ids: Vec::new(),
    })
}

fn query_role(conn: &Connection, id: Snowflake) -> Result<Option<Role>> {
    let role = conn
        .query_row(
            "SELECT id, board_id, name, permissions FROM roles WHERE id = ?1",
            [id],
            role_from_row,
        )
        .optional()?;
    let Some(mut role) = role else {
        return Ok(None);
    };
    let mut stmt =
        conn.prepare("SELECT parent_id FROM role_parents WHERE role_id = ?1 ORDER BY parent_id")?;
    role.parent_ids = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(role))
}

fn query_roles_of_board(conn: &Connection, board_id: Snowflake) -> Result<Vec<Role>> {
    let mut stmt = conn.prepare(
        "SELECT id, board_id, name, permissions FROM roles WHERE board_id = ?1 ORDER BY id",
    )?;
    let mut roles = stmt
        .query_map([board_id], role_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT p.role_id, p.parent_id FROM role_parents p
         JOIN roles r ON r.id = p.role_id
         WHERE r.board_id = ?1
         ORDER BY p.parent_id",
    )?;
    let mut parents: HashMap<Snowflake, Vec<Snowflake>> = HashMap::new();
    for edge in stmt.query_map([board_id], |row| {
        Ok((row.get::<_, Snowflake>(0)?, row.get::<_, Snowflake>(1)?))
    })? {
        let (role_id, parent_id) = edge?;
        parents.entry(role_id).or_default().push(parent_id);
    }
    for role in &mut roles {
        role.parent_ids = parents.remove(&role.id).unwrap_or_default();
    }
    Ok(roles)
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        topic: row.get(3)?,
        kind: row.get(4)?,
        position: row.get(5)?,
        last_message_id: row.get(6)?,
    })
}

fn query_channel(conn: &Connection, id: Snowflake) -> Result<Option<Channel>> {
    let sql = format!("SELECT {} FROM channels c WHERE c.id = ?1", CHANNEL_COLUMNS);
    let row = conn.query_row(&sql, [id], channel_from_row).optional()?;
    Ok(row)
}

fn query_channels_of_board(conn: &Connection, board_id: Snowflake) -> Result<Vec<Channel>> {
    let sql = format!(
        "SELECT {} FROM channels c WHERE c.board_id = ?1 ORDER BY c.position, c.id",
        CHANNEL_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([board_id], channel_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        board_id: row.get(2)?,
        author: User {
            id: row.get(3)?,
            username: row.get(4)?,
            discriminator: row.get(5)?,
        },
        content: row.get(6)?,
    })
}

fn query_message(conn: &Connection, channel_id: Snowflake, id: Snowflake) -> Result<Option<Message>> {
    let sql = format!("SELECT {} WHERE m.channel_id = ?1 AND m.id = ?2", MESSAGE_COLUMNS);
    let row = conn
        .query_row(&sql, params![channel_id, id], message_from_row)
        .optional()?;
    Ok(row)
}

/// The `limit` newest messages with id < `anchor`, oldest first.
fn newest_below(conn: &Connection, channel_id: Snowflake, anchor: Snowflake, limit: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} WHERE m.channel_id = ?1 AND m.id < ?2 ORDER BY m.id DESC LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params![channel_id, anchor, limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.reverse();
    Ok(rows)
}

/// The `limit` oldest messages with id > `anchor`.
fn oldest_above(conn: &Connection, channel_id: Snowflake, anchor: Snowflake, limit: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} WHERE m.channel_id = ?1 AND m.id > ?2 ORDER BY m.id ASC LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![channel_id, anchor, limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
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
