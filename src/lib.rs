//! Checkout core for the storefront: affiliate attribution, commission
//! settlement and loyalty coin redemption around order placement.

mod api;
mod error;
mod responses;

pub mod attribution;
pub mod checkout;
pub mod commission;
pub mod config;
pub mod loyalty;
pub mod orders;
pub mod referral;
pub mod settlement;
pub mod store;
pub mod types;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
pub use checkout::{CheckoutError, CheckoutReceipt, CheckoutRequest, CheckoutService};
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Initializes the database pool and applies pending migrations.
pub async fn init_pool(config: &crate::config::Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}
