//! In-memory checkout store.
//!
//! Every operation can be switched to fail, which lets callers exercise
//! the partial-failure paths of the checkout workflow.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AffiliateDirectory, CommissionLedger, LoyaltyStore, OrderStore, StoreError, StoreResult,
};
use crate::types::{
    Affiliate, AffiliateCommission, AffiliateOrder, AffiliateTotalsDelta, LoyaltyTransaction,
    LoyaltyWallet, Order, OrderLineItem, Shipment,
};

/// Store operations, used to inject failures and to inspect call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    AffiliateLookup,
    InsertOrder,
    InsertLineItems,
    InsertShipment,
    FlagOrder,
    InsertCommission,
    InsertAffiliateOrder,
    IncrementAffiliateTotals,
    DeductCoinsAtomic,
    ReadWallet,
    SwapWallet,
    InsertLoyaltyTransaction,
}

#[derive(Default)]
struct Tables {
    affiliates: HashMap<Uuid, Affiliate>,
    coupons: HashMap<String, (Uuid, bool)>,
    profiles: HashMap<Uuid, Uuid>,
    orders: HashMap<Uuid, Order>,
    flagged: HashMap<Uuid, String>,
    line_items: HashMap<Uuid, Vec<OrderLineItem>>,
    shipments: Vec<Shipment>,
    commissions: Vec<AffiliateCommission>,
    affiliate_orders: Vec<AffiliateOrder>,
    wallets: HashMap<Uuid, LoyaltyWallet>,
    loyalty_transactions: Vec<LoyaltyTransaction>,
}

/// A competing redemption that lands between a wallet read and its swap.
#[derive(Default, Clone, Copy)]
struct SwapContention {
    remaining: u32,
    coins: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing: RwLock<HashSet<StoreOp>>,
    calls: RwLock<Vec<StoreOp>>,
    contention: RwLock<SwapContention>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failing(&self, op: StoreOp, fail: bool) {
        let mut failing = self.failing.write().await;
        if fail {
            failing.insert(op);
        } else {
            failing.remove(&op);
        }
    }

    /// Makes the next `times` wallet swaps lose their race: just before each
    /// comparison another redemption of `coins` is applied to the wallet.
    pub async fn contend_swaps(&self, times: u32, coins: i64) {
        *self.contention.write().await = SwapContention {
            remaining: times,
            coins,
        };
    }

    pub async fn add_affiliate(&self, affiliate: Affiliate) {
        self.tables
            .write()
            .await
            .affiliates
            .insert(affiliate.id, affiliate);
    }

    pub async fn bind_coupon(&self, code: &str, affiliate_id: Uuid, is_active: bool) {
        self.tables
            .write()
            .await
            .coupons
            .insert(code.to_string(), (affiliate_id, is_active));
    }

    pub async fn set_profile_affiliate(&self, user_id: Uuid, affiliate_id: Uuid) {
        self.tables
            .write()
            .await
            .profiles
            .insert(user_id, affiliate_id);
    }

    pub async fn put_wallet(&self, wallet: LoyaltyWallet) {
        self.tables
            .write()
            .await
            .wallets
            .insert(wallet.user_id, wallet);
    }

    pub async fn affiliate(&self, id: Uuid) -> Option<Affiliate> {
        self.tables.read().await.affiliates.get(&id).cloned()
    }

    pub async fn order(&self, id: Uuid) -> Option<Order> {
        self.tables.read().await.orders.get(&id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn line_items(&self, order_id: Uuid) -> Vec<OrderLineItem> {
        self.tables
            .read()
            .await
            .line_items
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn shipments(&self) -> Vec<Shipment> {
        self.tables.read().await.shipments.clone()
    }

    pub async fn reconciliation_note(&self, order_id: Uuid) -> Option<String> {
        self.tables.read().await.flagged.get(&order_id).cloned()
    }

    pub async fn commissions(&self) -> Vec<AffiliateCommission> {
        self.tables.read().await.commissions.clone()
    }

    pub async fn affiliate_orders(&self) -> Vec<AffiliateOrder> {
        self.tables.read().await.affiliate_orders.clone()
    }

    pub async fn loyalty_transactions(&self) -> Vec<LoyaltyTransaction> {
        self.tables.read().await.loyalty_transactions.clone()
    }

    pub async fn stored_wallet(&self, user_id: Uuid) -> Option<LoyaltyWallet> {
        self.tables.read().await.wallets.get(&user_id).copied()
    }

    /// Operations attempted so far, in call order.
    pub async fn calls(&self) -> Vec<StoreOp> {
        self.calls.read().await.clone()
    }

    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        self.calls.write().await.push(op);
        if self.failing.read().await.contains(&op) {
            return Err(StoreError::Unavailable(format!("{op:?} switched off")));
        }
        Ok(())
    }
}

#[async_trait]
impl AffiliateDirectory for MemoryStore {
    async fn affiliate_for_coupon(&self, coupon_code: &str) -> StoreResult<Option<Uuid>> {
        self.enter(StoreOp::AffiliateLookup).await?;
        let tables = self.tables.read().await;
        Ok(tables
            .coupons
            .get(coupon_code)
            .filter(|(_, active)| *active)
            .map(|(id, _)| *id))
    }

    async fn affiliate_by_id(&self, id: Uuid) -> StoreResult<Option<Affiliate>> {
        self.enter(StoreOp::AffiliateLookup).await?;
        Ok(self.tables.read().await.affiliates.get(&id).cloned())
    }

    async fn affiliate_by_code(&self, referral_code: &str) -> StoreResult<Option<Affiliate>> {
        self.enter(StoreOp::AffiliateLookup).await?;
        Ok(self
            .tables
            .read()
            .await
            .affiliates
            .values()
            .find(|a| a.referral_code == referral_code)
            .cloned())
    }

    async fn profile_affiliate(&self, user_id: Uuid) -> StoreResult<Option<Uuid>> {
        self.enter(StoreOp::AffiliateLookup).await?;
        Ok(self.tables.read().await.profiles.get(&user_id).copied())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.enter(StoreOp::InsertOrder).await?;
        self.tables
            .write()
            .await
            .orders
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_line_items(&self, order_id: Uuid, items: &[OrderLineItem]) -> StoreResult<()> {
        self.enter(StoreOp::InsertLineItems).await?;
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound(format!("order {order_id}")));
        }
        tables
            .line_items
            .entry(order_id)
            .or_default()
            .extend_from_slice(items);
        Ok(())
    }

    async fn insert_shipment(&self, shipment: &Shipment) -> StoreResult<()> {
        self.enter(StoreOp::InsertShipment).await?;
        self.tables.write().await.shipments.push(shipment.clone());
        Ok(())
    }

    async fn flag_for_reconciliation(&self, order_id: Uuid, reason: &str) -> StoreResult<()> {
        self.enter(StoreOp::FlagOrder).await?;
        self.tables
            .write()
            .await
            .flagged
            .insert(order_id, reason.to_string());
        Ok(())
    }
}

#[async_trait]
impl CommissionLedger for MemoryStore {
    async fn insert_commission(&self, commission: &AffiliateCommission) -> StoreResult<()> {
        self.enter(StoreOp::InsertCommission).await?;
        self.tables
            .write()
            .await
            .commissions
            .push(commission.clone());
        Ok(())
    }

    async fn insert_affiliate_order(&self, row: &AffiliateOrder) -> StoreResult<()> {
        self.enter(StoreOp::InsertAffiliateOrder).await?;
        self.tables
            .write()
            .await
            .affiliate_orders
            .push(row.clone());
        Ok(())
    }

    async fn increment_affiliate_totals(
        &self,
        affiliate_id: Uuid,
        delta: AffiliateTotalsDelta,
    ) -> StoreResult<()> {
        self.enter(StoreOp::IncrementAffiliateTotals).await?;
        // Single write guard: the increment is atomic with respect to other callers.
        let mut tables = self.tables.write().await;
        let affiliate = tables
            .affiliates
            .get_mut(&affiliate_id)
            .ok_or_else(|| StoreError::NotFound(format!("affiliate {affiliate_id}")))?;
        let wallet_balance = add(affiliate.wallet_balance, delta.wallet_balance, "wallet")?;
        let total_orders = add(affiliate.total_orders, delta.orders, "orders")?;
        let total_sales = add(affiliate.total_sales, delta.sales, "sales")?;
        let total_commission = add(affiliate.total_commission, delta.commission, "commission")?;
        affiliate.wallet_balance = wallet_balance;
        affiliate.total_orders = total_orders;
        affiliate.total_sales = total_sales;
        affiliate.total_commission = total_commission;
        Ok(())
    }
}

#[async_trait]
impl LoyaltyStore for MemoryStore {
    async fn deduct_coins_atomic(&self, user_id: Uuid, coins: i64) -> StoreResult<i64> {
        self.enter(StoreOp::DeductCoinsAtomic).await?;
        let mut tables = self.tables.write().await;
        let wallet = tables
            .wallets
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {user_id}")))?;
        if wallet.available < coins {
            return Err(StoreError::InsufficientBalance {
                available: wallet.available,
                requested: coins,
            });
        }
        wallet.total_redeemed = add(wallet.total_redeemed, coins, "total_redeemed")?;
        wallet.available -= coins;
        Ok(wallet.available)
    }

    async fn wallet(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyWallet>> {
        self.enter(StoreOp::ReadWallet).await?;
        Ok(self.tables.read().await.wallets.get(&user_id).copied())
    }

    async fn swap_wallet(
        &self,
        expected: &LoyaltyWallet,
        replacement: &LoyaltyWallet,
    ) -> StoreResult<bool> {
        self.enter(StoreOp::SwapWallet).await?;
        let mut contention = self.contention.write().await;
        let mut tables = self.tables.write().await;
        let Some(current) = tables.wallets.get_mut(&expected.user_id) else {
            return Ok(false);
        };
        if contention.remaining > 0 {
            contention.remaining -= 1;
            current.available = (current.available - contention.coins).max(0);
            current.total_redeemed =
                add(current.total_redeemed, contention.coins, "total_redeemed")?;
        }
        // Same key as the SQL update: total_earned is not compared.
        if current.available != expected.available
            || current.total_redeemed != expected.total_redeemed
        {
            return Ok(false);
        }
        current.available = replacement.available;
        current.total_redeemed = replacement.total_redeemed;
        Ok(true)
    }

    async fn insert_transaction(&self, tx: &LoyaltyTransaction) -> StoreResult<()> {
        self.enter(StoreOp::InsertLoyaltyTransaction).await?;
        self.tables
            .write()
            .await
            .loyalty_transactions
            .push(tx.clone());
        Ok(())
    }
}

fn add(current: i64, delta: i64, column: &str) -> StoreResult<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| StoreError::OutOfRange(format!("{column} overflows")))
}
