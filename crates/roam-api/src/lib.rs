pub mod boards;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod users;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::state::AppState;

/// Every REST route, behind bearer authentication.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users/@me", get(users::get_me).patch(users::modify_me))
        .route("/users/{user_id}", get(users::get_user))
        .route("/boards", post(boards::create_board))
        .route(
            "/boards/{board_id}",
            get(boards::get_board)
                .patch(boards::modify_board)
                .delete(boards::delete_board),
        )
        .route(
            "/boards/{board_id}/channels",
            get(channels::list_channels)
                .post(channels::create_channel)
                .patch(channels::reorder_channels),
        )
        .route(
            "/channels/{channel_id}",
            get(channels::get_channel)
                .patch(channels::modify_channel)
                .delete(channels::delete_channel),
        )
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/channels/{channel_id}/messages/{message_id}",
            get(messages::get_message),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
