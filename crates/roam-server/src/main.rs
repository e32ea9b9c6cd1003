mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use futures_util::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use roam_api::state::{AppState, AppStateInner};
use roam_gateway::Gateway;
use roam_gateway::config::{GatewayConfig, VoteConfig};
use roam_gateway::deletion::DeletionVotes;
use roam_gateway::identity::{HttpResolver, IdentityResolver, JwtResolver};
use roam_gateway::registry::SessionRegistry;
use roam_gateway::session;
use roam_gateway::snowflake::{HttpSnowflake, IdGenerator, SnowflakeGenerator};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roam=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(roam_db::Database::open(&config.db_path)?);

    // External collaborators
    let resolver: Arc<dyn IdentityResolver> = match &config.auth_url {
        Some(url) => {
            info!("Resolving tokens via {}", url);
            Arc::new(HttpResolver::new(url.clone()))
        }
        None => Arc::new(JwtResolver::new(config.jwt_secret.clone())),
    };
    let ids: Arc<dyn IdGenerator> = match &config.snowflake_url {
        Some(url) => {
            info!("Minting ids via {}", url);
            Arc::new(HttpSnowflake::new(url.clone()))
        }
        None => Arc::new(SnowflakeGenerator::new(config.worker_id)),
    };

    // Shared state
    let registry = SessionRegistry::new();
    let gateway = Gateway {
        registry: registry.clone(),
        db: db.clone(),
        resolver,
        config: Arc::new(GatewayConfig::default()),
    };
    let votes = DeletionVotes::new(
        db,
        registry.clone(),
        VoteConfig {
            budget_ticks: config.delete_vote_ticks,
            ..VoteConfig::default()
        },
    );
    let app_state: AppState = Arc::new(AppStateInner {
        gateway: gateway.clone(),
        votes,
        ids,
    });

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(roam_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Roam server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let (sink, stream) = socket.split();
        session::handle_connection(sink, stream, gateway)
    })
}

/// Resolves on Ctrl+C or SIGTERM, after closing every gateway session.
async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            },
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    registry.shutdown().await;
}
