use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// External auth service; local JWT validation when unset.
    pub auth_url: Option<String>,
    /// External snowflake service; in-process generator when unset.
    pub snowflake_url: Option<String>,
    pub worker_id: u16,
    pub delete_vote_ticks: u32,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(v) => v.parse().with_context(|| format!("invalid {}: {:?}", name, v)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = var("ROAM_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        let auth_url = var("ROAM_AUTH_URL");
        if auth_url.is_none() && PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("ROAM_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        Ok(Self {
            host: var("ROAM_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("ROAM_PORT", 3000)?,
            db_path: var("ROAM_DB_PATH").unwrap_or_else(|| "roam.db".into()).into(),
            jwt_secret,
            auth_url,
            snowflake_url: var("ROAM_SNOWFLAKE_URL"),
            worker_id: parsed("ROAM_WORKER_ID", 0)?,
            delete_vote_ticks: parsed("ROAM_DELETE_VOTE_TICKS", 300)?,
        })
    }
}
