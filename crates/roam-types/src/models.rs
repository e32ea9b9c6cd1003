use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique, time-sortable id. The upper bits carry milliseconds
/// since [`EPOCH_MS`], so ordering by id is ordering by creation time.
pub type Snowflake = i64;

/// 2019-05-27T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: i64 = 1_558_915_200_000;

/// Number of low bits below the timestamp (10 worker bits + 12 sequence bits).
pub const TIMESTAMP_SHIFT: u32 = 22;

/// Recover the creation time embedded in a snowflake.
pub fn snowflake_timestamp(id: Snowflake) -> DateTime<Utc> {
    let millis = (id >> TIMESTAMP_SHIFT) + EPOCH_MS;
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Name of the role every board must carry for its owners.
pub const OWNER_ROLE: &str = "Owner";

/// Name of the default role every board must carry.
pub const EVERYONE_ROLE: &str = "everyone";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub board_id: Snowflake,
    pub name: String,
    pub permissions: u64,
    /// Recorded but never consulted when evaluating permissions.
    pub parent_ids: Vec<Snowflake>,
}

/// The user -> board edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Snowflake,
    pub board_id: Snowflake,
    pub role_id: Snowflake,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    pub board_id: Snowflake,
    pub name: String,
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: i64,
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<Snowflake>,
}

/// A stored message. There is no timestamp column: the id carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub board_id: Snowflake,
    pub author: User,
    pub content: String,
}

impl Message {
    pub fn created_at(&self) -> DateTime<Utc> {
        snowflake_timestamp(self.id)
    }
}
