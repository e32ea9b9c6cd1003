use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use roam_db::NewBoard;
use roam_types::api::{CreateBoardRequest, DeleteVoteResponse, ModifyBoardRequest};
use roam_types::events::{BoardPayload, GatewayEvent};
use roam_types::models::{OWNER_ROLE, Snowflake, User};
use roam_types::permissions::{MissingPermission, Permission};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_BOARD_NAME: usize = 100;

fn board_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_BOARD_NAME {
        return Err(ApiError::bad_request("Board name must be 1-100 characters"));
    }
    Ok(name.to_string())
}

pub async fn create_board(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<CreateBoardRequest>,
) -> ApiResult<(StatusCode, Json<BoardPayload>)> {
    let new = NewBoard {
        id: state.next_id().await?,
        name: board_name(&req.name)?,
        creator_id: me.id,
        owner_role_id: state.next_id().await?,
        everyone_role_id: state.next_id().await?,
        general_channel_id: state.next_id().await?,
    };

    let board_id = new.id;
    let snapshot = state
        .db(move |db| {
            db.create_board(&new)?;
            db.board_snapshot(new.id)
        })
        .await?
        .ok_or(ApiError::NotFound("board"))?;
    info!("{} ({}) created board {}", me.username, me.id, board_id);

    let payload = snapshot.render_for(me.id);
    state.publish(GatewayEvent::BoardCreate(snapshot)).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn get_board(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
) -> ApiResult<Json<BoardPayload>> {
    let snapshot = state
        .db(move |db| db.board_snapshot(board_id))
        .await?
        .ok_or(ApiError::NotFound("board"))?;
    state.role_on(me.id, board_id).await?;
    Ok(Json(snapshot.render_for(me.id)))
}

pub async fn modify_board(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
    Json(req): Json<ModifyBoardRequest>,
) -> ApiResult<Json<BoardPayload>> {
    state
        .permissions_on(me.id, board_id)
        .await?
        .require(&[Permission::ManageBoard])?;

    let name = req.name.as_deref().map(board_name).transpose()?;
    let snapshot = state
        .db(move |db| {
            if let Some(name) = &name {
                db.rename_board(board_id, name)?;
            }
            db.board_snapshot(board_id)
        })
        .await?
        .ok_or(ApiError::NotFound("board"))?;

    let payload = snapshot.render_for(me.id);
    state.publish(GatewayEvent::BoardUpdate(snapshot)).await?;
    Ok(Json(payload))
}

/// Cast the caller's vote to delete the board. Deletion happens once
/// enough owners have voted; until then this reports progress.
pub async fn delete_board(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(board_id): Path<Snowflake>,
) -> ApiResult<(StatusCode, Json<DeleteVoteResponse>)> {
    let role = state.role_on(me.id, board_id).await?;
    if role.name != OWNER_ROLE {
        return Err(MissingPermission(Permission::Administrator).into());
    }

    let progress = state.votes.vote(board_id, me.id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DeleteVoteResponse {
            votes: progress.votes,
            required: progress.required,
        }),
    ))
}
