//! Persistence boundary used by the checkout core.
//!
//! Every method is a single logical operation. Nothing here offers a
//! transaction spanning more than one call.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{
    Affiliate, AffiliateCommission, AffiliateOrder, AffiliateTotalsDelta, LoyaltyTransaction,
    LoyaltyWallet, Order, OrderLineItem, Shipment,
};

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// Read-only affiliate lookups.
#[async_trait]
pub trait AffiliateDirectory: Send + Sync {
    /// Affiliate bound to an active coupon, if any.
    async fn affiliate_for_coupon(&self, coupon_code: &str) -> StoreResult<Option<Uuid>>;

    async fn affiliate_by_id(&self, id: Uuid) -> StoreResult<Option<Affiliate>>;

    async fn affiliate_by_code(&self, referral_code: &str) -> StoreResult<Option<Affiliate>>;

    /// Persistent affiliate reference stored on the shopper's profile.
    async fn profile_affiliate(&self, user_id: Uuid) -> StoreResult<Option<Uuid>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    /// Writes all items of one order as a single batch.
    async fn insert_line_items(&self, order_id: Uuid, items: &[OrderLineItem]) -> StoreResult<()>;

    async fn insert_shipment(&self, shipment: &Shipment) -> StoreResult<()>;

    /// Marks an order as needing operator reconciliation.
    async fn flag_for_reconciliation(&self, order_id: Uuid, reason: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait CommissionLedger: Send + Sync {
    async fn insert_commission(&self, commission: &AffiliateCommission) -> StoreResult<()>;

    async fn insert_affiliate_order(&self, row: &AffiliateOrder) -> StoreResult<()>;

    /// Adds `delta` to the affiliate's aggregates in one atomic statement.
    async fn increment_affiliate_totals(
        &self,
        affiliate_id: Uuid,
        delta: AffiliateTotalsDelta,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    /// Guarded single-statement deduction. Returns the new available balance.
    async fn deduct_coins_atomic(&self, user_id: Uuid, coins: i64) -> StoreResult<i64>;

    async fn wallet(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyWallet>>;

    /// Replaces the wallet only if it still equals `expected`. Returns false on a lost race.
    async fn swap_wallet(
        &self,
        expected: &LoyaltyWallet,
        replacement: &LoyaltyWallet,
    ) -> StoreResult<bool>;

    async fn insert_transaction(&self, tx: &LoyaltyTransaction) -> StoreResult<()>;
}

/// Everything the checkout workflow needs from storage.
pub trait CheckoutStore: AffiliateDirectory + OrderStore + CommissionLedger + LoyaltyStore {}

impl<T> CheckoutStore for T where
    T: AffiliateDirectory + OrderStore + CommissionLedger + LoyaltyStore
{
}
