use axum::{
    Extension, Json,
    extract::{Path, State},
};

use roam_types::api::ModifyUserRequest;
use roam_types::models::{Snowflake, User};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_USERNAME: usize = 32;

pub async fn get_me(Extension(me): Extension<User>) -> Json<User> {
    Json(me)
}

pub async fn modify_me(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<ModifyUserRequest>,
) -> ApiResult<Json<User>> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.chars().count() > MAX_USERNAME {
        return Err(ApiError::bad_request("Username must be 1-32 characters"));
    }

    let user = state
        .db(move |db| db.rename_user(me.id, &username))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Snowflake>,
) -> ApiResult<Json<User>> {
    let user = state
        .db(move |db| db.get_user(user_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}
