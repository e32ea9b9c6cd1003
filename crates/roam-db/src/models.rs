//! Insert/update inputs for the storage layer.
//! Reads come back as `roam_types::models` values directly.

use roam_types::models::Snowflake;

/// Everything needed to create a board with its mandatory roles and
/// starting channel. Ids are minted by the caller.
#[derive(Debug, Clone)]
pub struct NewBoard {
    pub id: Snowflake,
    pub name: String,
    pub creator_id: Snowflake,
    pub owner_role_id: Snowflake,
    pub everyone_role_id: Snowflake,
    pub general_channel_id: Snowflake,
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub id: Snowflake,
    pub board_id: Snowflake,
    pub name: String,
    pub topic: String,
    pub kind: i64,
    /// `None` appends after the last sibling.
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelChanges {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub position: Option<i64>,
}
