use std::sync::Arc;

use roam_db::Database;
use roam_gateway::Gateway;
use roam_gateway::deletion::DeletionVotes;
use roam_gateway::snowflake::IdGenerator;
use roam_types::events::GatewayEvent;
use roam_types::models::{Channel, Role, Snowflake};
use roam_types::permissions::Permissions;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub votes: DeletionVotes,
    pub ids: Arc<dyn IdGenerator>,
}

impl AppStateInner {
    /// Run a storage call off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.gateway.db.clone();
        let out = tokio::task::spawn_blocking(move || f(&db)).await??;
        Ok(out)
    }

    pub async fn next_id(&self) -> ApiResult<Snowflake> {
        Ok(self.ids.next_id().await?)
    }

    /// The role on `user_id`'s subscription to `board_id`. Not being
    /// subscribed is a bad request, not a permission failure.
    pub async fn role_on(&self, user_id: Snowflake, board_id: Snowflake) -> ApiResult<Role> {
        self.db(move |db| db.subscription_role(user_id, board_id))
            .await?
            .ok_or_else(|| ApiError::bad_request("Not a member of this board"))
    }

    pub async fn permissions_on(&self, user_id: Snowflake, board_id: Snowflake) -> ApiResult<Permissions> {
        Ok(Permissions(self.role_on(user_id, board_id).await?.permissions))
    }

    pub async fn channel(&self, channel_id: Snowflake) -> ApiResult<Channel> {
        self.db(move |db| db.get_channel(channel_id))
            .await?
            .ok_or(ApiError::NotFound("channel"))
    }

    /// Send `event` to every current subscriber of its board.
    pub async fn publish(&self, event: GatewayEvent) -> ApiResult<usize> {
        let board_id = event.board_id();
        let subscribers = self.db(move |db| db.subscribers(board_id)).await?;
        Ok(self.gateway.registry.publish(event, &subscribers).await)
    }
}
