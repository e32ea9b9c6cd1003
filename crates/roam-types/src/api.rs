use serde::{Deserialize, Serialize};

use crate::models::Snowflake;

// -- Auth --

/// JWT claims understood by the local token resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string.
    pub sub: String,
    pub username: String,
    pub discriminator: String,
    pub exp: usize,
}

/// Identity returned by the auth collaborator for a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(alias = "uid")]
    pub id: Snowflake,
    pub username: String,
    pub discriminator: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyUserRequest {
    pub username: String,
}

// -- Boards --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBoardRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyBoardRequest {
    pub name: Option<String>,
}

/// Progress of a board deletion vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVoteResponse {
    pub votes: usize,
    pub required: usize,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<i64>,
    pub topic: Option<String>,
    pub position: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyChannelRequest {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChannelPosition {
    pub id: Snowflake,
    pub position: i64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}
