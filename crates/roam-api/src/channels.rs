use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

use roam_db::{ChannelChanges, NewChannel};
use roam_types::api::{ChannelPosition, CreateChannelRequest, ModifyChannelRequest};
use roam_types::events::GatewayEvent;
use roam_types::models::{Channel, Snowflake, User};
use roam_types::permissions::Permission;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_CHANNEL_NAME: usize = 100;
const MAX_TOPIC: usize = 1024;

fn channel_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_CHANNEL_NAME {
        return Err(ApiError::bad_request("Channel name must be 1-100 characters"));
    }
    Ok(name.to_string())
}

fn topic(topic: &str) -> ApiResult<String> {
    if topic.chars().count() > MAX_TOPIC {
        return Err(ApiError::bad_request("Topic must be at most 1024 characters"));
    }
    Ok(topic.to_string())
}

/// Check a reorder request against the board's channels before anything
/// is written: at least two entries, every id a channel of the board and
/// listed once, and no two entries sharing a position.
pub fn validate_reorder(entries: &[ChannelPosition], board_channels: &[Snowflake]) -> ApiResult<()> {
    if entries.len() < 2 {
        return Err(ApiError::bad_request("At least two channels are required"));
    }

    let known: HashSet<Snowflake> = board_channels.iter().copied().collect();
    let mut ids = HashSet::with_capacity(entries.len());
    let mut positions = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !known.contains(&entry.id) {
            return Err(ApiError::bad_request(format!(
                "Channel {} is not part of this board",
                entry.id
            )));
        }
        if !ids.insert(entry.id) {
            return Err(ApiError::bad_request(format!("Channel {} listed twice", entry.id)));
        }
        if !positions.insert(entry.position) {
            return Err(ApiError::bad_request(format!(
                "Position {} used more than once",
                entry.position
            )));
        }
    }
    Ok(())
}

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
) -> ApiResult<Json<Vec<Channel>>> {
    state.role_on(me.id, board_id).await?;
    let channels = state.db(move |db| db.channels_of_board(board_id)).await?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<Channel>)> {
    state
        .permissions_on(me.id, board_id)
        .await?
        .require(&[Permission::ManageChannels])?;

    let new = NewChannel {
        id: state.next_id().await?,
        board_id,
        name: channel_name(&req.name)?,
        topic: topic(req.topic.as_deref().unwrap_or_default())?,
        kind: req.kind.unwrap_or(0),
        position: req.position,
    };
    let channel = state.db(move |db| db.create_channel(&new)).await?;

    state.publish(GatewayEvent::ChannelCreate(channel.clone())).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn reorder_channels(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
    Json(entries): Json<Vec<ChannelPosition>>,
) -> ApiResult<StatusCode> {
    state
        .permissions_on(me.id, board_id)
        .await?
        .require(&[Permission::ManageChannels])?;

    let existing: Vec<Snowflake> = state
        .db(move |db| db.channels_of_board(board_id))
        .await?
        .iter()
        .map(|c| c.id)
        .collect();
    validate_reorder(&entries, &existing)?;

    let moves: Vec<(Snowflake, i64)> = entries.iter().map(|e| (e.id, e.position)).collect();
    let updated = state
        .db(move |db| db.set_channel_positions(board_id, &moves))
        .await?;

    for channel in updated {
        state.publish(GatewayEvent::ChannelUpdate(channel)).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_channel(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(channel_id): Path<Snowflake>,
) -> ApiResult<Json<Channel>> {
    let channel = state.channel(channel_id).await?;
    state.role_on(me.id, channel.board_id).await?;
    Ok(Json(channel))
}

pub async fn modify_channel(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(channel_id): Path<Snowflake>,
    Json(req): Json<ModifyChannelRequest>,
) -> ApiResult<Json<Channel>> {
    let channel = state.channel(channel_id).await?;
    state
        .permissions_on(me.id, channel.board_id)
        .await?
        .require(&[Permission::ManageChannels])?;

    let changes = ChannelChanges {
        name: req.name.as_deref().map(channel_name).transpose()?,
        topic: req.topic.as_deref().map(topic).transpose()?,
        position: req.position,
    };
    let channel = state
        .db(move |db| db.update_channel(channel_id, &changes))
        .await?
        .ok_or(ApiError::NotFound("channel"))?;

    state.publish(GatewayEvent::ChannelUpdate(channel.clone())).await?;
    Ok(Json(channel))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(channel_id): Path<Snowflake>,
) -> ApiResult<Json<Channel>> {
    let channel = state.channel(channel_id).await?;
    state
        .permissions_on(me.id, channel.board_id)
        .await?
        .require(&[Permission::ManageChannels])?;

    let channel = state
        .db(move |db| db.delete_channel(channel_id))
        .await?
        .ok_or(ApiError::NotFound("channel"))?;

    state.publish(GatewayEvent::ChannelDelete(channel.clone())).await?;
    Ok(Json(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: Snowflake, position: i64) -> ChannelPosition {
        ChannelPosition { id, position }
    }

    #[test]
    fn test_reorder_accepts_swap() {
        assert!(validate_reorder(&[at(1, 1), at(2, 0)], &[1, 2, 3]).is_ok());
    }

    #[test]
    fn test_reorder_needs_two_entries() {
        assert!(validate_reorder(&[at(1, 3)], &[1, 2]).is_err());
        assert!(validate_reorder(&[], &[1, 2]).is_err());
    }

    #[test]
    fn test_reorder_rejects_colliding_positions() {
        let err = validate_reorder(&[at(1, 0), at(2, 0)], &[1, 2]).unwrap_err();
        assert_eq!(err.to_string(), "Position 0 used more than once");
    }

    #[test]
    fn test_reorder_rejects_foreign_and_repeated_ids() {
        assert!(validate_reorder(&[at(1, 0), at(9, 1)], &[1, 2]).is_err());
        assert!(validate_reorder(&[at(1, 0), at(1, 1)], &[1, 2]).is_err());
    }
}
