use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use commission_engine::audit::TracingAuditLog;
use commission_engine::gateway::HttpTransferGateway;
use commission_engine::notify::TracingNotifier;
use commission_engine::{AppState, Config, PgAccountResolver, PgStore, init_router};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url).await?;
    let accounts = PgAccountResolver::new(store.pool().clone());
    let transfers = HttpTransferGateway::new(
        &config.transfer_api_url,
        &config.transfer_api_key,
        Duration::from_secs(config.transfer_timeout_secs),
    )?;

    let state = AppState {
        store: Arc::new(store),
        accounts: Arc::new(accounts),
        transfers: Arc::new(transfers),
        audit: Arc::new(TracingAuditLog),
        notifier: Arc::new(TracingNotifier),
        config: config.clone(),
    };

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");

    let app = init_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
