use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::debug;

use roam_types::api::SendMessageRequest;
use roam_types::events::{GatewayEvent, MessagePayload};
use roam_types::models::{Snowflake, User};
use roam_types::pagination::{Cursor, MessageQuery};
use roam_types::permissions::Permission;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_CONTENT: usize = 2000;

/// A window of channel history, oldest first. Callers who may read the
/// channel but not its history get an empty list.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(channel_id): Path<Snowflake>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<MessagePayload>>> {
    let cursor = Cursor::try_from(&query)?;
    let channel = state.channel(channel_id).await?;
    let perms = state.permissions_on(me.id, channel.board_id).await?;
    perms.require(&[Permission::ReadMessages])?;

    if !perms.allows(Permission::ReadMessageHistory) {
        debug!("{} has no history access in channel {}", me.id, channel_id);
        return Ok(Json(Vec::new()));
    }

    let messages = state
        .db(move |db| db.messages_page(channel_id, &cursor))
        .await?;
    Ok(Json(messages.iter().map(MessagePayload::from).collect()))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path((channel_id, message_id)): Path<(Snowflake, Snowflake)>,
) -> ApiResult<Json<MessagePayload>> {
    let channel = state.channel(channel_id).await?;
    state
        .permissions_on(me.id, channel.board_id)
        .await?
        .require(&[Permission::ReadMessageHistory])?;

    let message = state
        .db(move |db| db.get_message(channel_id, message_id))
        .await?
        .ok_or(ApiError::NotFound("message"))?;
    Ok(Json(MessagePayload::from(&message)))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(channel_id): Path<Snowflake>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessagePayload>)> {
    let channel = state.channel(channel_id).await?;
    state
        .permissions_on(me.id, channel.board_id)
        .await?
        .require(&[Permission::SendMessages])?;

    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("Cannot send an empty message"));
    }
    if req.content.chars().count() > MAX_CONTENT {
        return Err(ApiError::bad_request("Message must be at most 2000 characters"));
    }

    let id = state.next_id().await?;
    let author_id = me.id;
    let message = state
        .db(move |db| db.create_message(id, channel_id, author_id, &req.content))
        .await?;

    let payload = MessagePayload::from(&message);
    state.publish(GatewayEvent::MessageCreate(message)).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}
