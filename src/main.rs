use std::net::SocketAddr;
use std::sync::Arc;

use affiliate_checkout::config::Config;
use affiliate_checkout::store::PgStore;
use affiliate_checkout::{AppState, CheckoutService, init_pool, init_router};
use anyhow::Context;
use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = init_pool(&config).await?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let app_state = AppState {
        checkout: CheckoutService::new(store.clone(), config.checkout_settings()),
        store,
        pool: Some(pool),
    };

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);
    axum::serve(listener, init_router(app_state)).await?;
    Ok(())
}
