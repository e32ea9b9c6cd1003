pub mod config;
pub mod deletion;
pub mod heartbeat;
pub mod identity;
pub mod registry;
pub mod session;
pub mod snowflake;

use std::sync::Arc;

use roam_db::Database;

use crate::config::GatewayConfig;
use crate::identity::IdentityResolver;
use crate::registry::SessionRegistry;

/// Everything a connection session needs. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub registry: SessionRegistry,
    pub db: Arc<Database>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub config: Arc<GatewayConfig>,
}

/// Run a storage call on the blocking pool so SQLite never stalls a worker.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await?
}
