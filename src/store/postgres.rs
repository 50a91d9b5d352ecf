use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    AffiliateDirectory, CommissionLedger, LoyaltyStore, OrderStore, StoreError, StoreResult,
};
use crate::types::{
    Affiliate, AffiliateCommission, AffiliateOrder, AffiliateTotalsDelta, CommissionPolicy,
    LoyaltyTransaction, LoyaltyWallet, Order, OrderLineItem, Shipment,
};

const AFFILIATE_STATUS_ACTIVE: &str = "active";

/// Postgres-backed checkout store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AffiliateRow {
    id: Uuid,
    referral_code: String,
    commission_type: String,
    commission_value: i64,
    status: String,
    wallet_balance: i64,
    total_orders: i64,
    total_sales: i64,
    total_commission: i64,
}

impl AffiliateRow {
    fn into_domain(self) -> StoreResult<Affiliate> {
        let policy = CommissionPolicy::from_parts(&self.commission_type, self.commission_value)
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "affiliate {} has unknown commission type {:?}",
                    self.id, self.commission_type
                ))
            })?;
        Ok(Affiliate {
            id: self.id,
            referral_code: self.referral_code,
            policy,
            is_active: self.status == AFFILIATE_STATUS_ACTIVE,
            wallet_balance: self.wallet_balance,
            total_orders: self.total_orders,
            total_sales: self.total_sales,
            total_commission: self.total_commission,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: Uuid,
    available: i64,
    total_earned: i64,
    total_redeemed: i64,
}

const AFFILIATE_COLUMNS: &str = "id, referral_code, commission_type, commission_value, status, \
     wallet_balance, total_orders, total_sales, total_commission";

#[async_trait]
impl AffiliateDirectory for PgStore {
    async fn affiliate_for_coupon(&self, coupon_code: &str) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT affiliate_id FROM affiliate_coupons WHERE coupon_code = $1 AND is_active"#,
        )
        .bind(coupon_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn affiliate_by_id(&self, id: Uuid) -> StoreResult<Option<Affiliate>> {
        let sql = format!("SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE id = $1");
        sqlx::query_as::<_, AffiliateRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AffiliateRow::into_domain)
            .transpose()
    }

    async fn affiliate_by_code(&self, referral_code: &str) -> StoreResult<Option<Affiliate>> {
        let sql = format!("SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE referral_code = $1");
        sqlx::query_as::<_, AffiliateRow>(&sql)
            .bind(referral_code)
            .fetch_optional(&self.pool)
            .await?
            .map(AffiliateRow::into_domain)
            .transpose()
    }

    async fn profile_affiliate(&self, user_id: Uuid) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Option<Uuid>>(
            r#"SELECT affiliate_id FROM profiles WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.flatten())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id,
                shipping_name, shipping_phone, shipping_line1, shipping_line2,
                shipping_city, shipping_state, shipping_postal,
                subtotal, shipping_cost, discount, coupon_discount, wallet_amount_used,
                loyalty_coins_used, loyalty_coins_value, coins_to_earn, total,
                payment_method, payment_status, status, coupon_code,
                affiliate_id, referral_source, commission_amount, commission_status, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
            )
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(&order.shipping.name)
        .bind(&order.shipping.phone)
        .bind(&order.shipping.line1)
        .bind(&order.shipping.line2)
        .bind(&order.shipping.city)
        .bind(&order.shipping.state)
        .bind(&order.shipping.postal_code)
        .bind(order.subtotal)
        .bind(order.shipping_cost)
        .bind(order.discount)
        .bind(order.coupon_discount)
        .bind(order.wallet_amount_used)
        .bind(order.loyalty_coins_used)
        .bind(order.loyalty_coins_value)
        .bind(order.coins_to_earn)
        .bind(order.total)
        .bind(&order.payment_method)
        .bind(&order.payment_status)
        .bind(&order.status)
        .bind(&order.coupon_code)
        .bind(order.affiliate_id)
        .bind(order.referral_source.map(|s| s.as_str()))
        .bind(order.commission_amount)
        .bind(&order.commission_status)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_line_items(&self, order_id: Uuid, items: &[OrderLineItem]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO order_items \
             (order_id, product_id, name, image_url, size, color, quantity, unit_price, line_total) ",
        );
        qb.push_values(items, |mut b, item| {
            b.push_bind(order_id)
                .push_bind(item.product_id)
                .push_bind(&item.name)
                .push_bind(&item.image_url)
                .push_bind(&item.size)
                .push_bind(&item.color)
                .push_bind(item.quantity)
                .push_bind(item.unit_price)
                .push_bind(item.line_total);
        });
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_shipment(&self, shipment: &Shipment) -> StoreResult<()> {
        sqlx::query(r#"INSERT INTO shipments (id, order_id, status) VALUES ($1, $2, $3)"#)
            .bind(shipment.id)
            .bind(shipment.order_id)
            .bind(&shipment.status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn flag_for_reconciliation(&self, order_id: Uuid, reason: &str) -> StoreResult<()> {
        let res = sqlx::query(
            r#"UPDATE orders SET needs_reconciliation = TRUE, reconciliation_note = $2 WHERE id = $1"#,
        )
        .bind(order_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CommissionLedger for PgStore {
    async fn insert_commission(&self, commission: &AffiliateCommission) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO affiliate_commissions
                 (id, affiliate_id, order_id, commission_type, commission_value,
                  order_amount, commission_amount, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(commission.id)
        .bind(commission.affiliate_id)
        .bind(commission.order_id)
        .bind(commission.policy.kind())
        .bind(commission.policy.value())
        .bind(commission.order_amount)
        .bind(commission.commission_amount)
        .bind(&commission.status)
        .bind(commission.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_affiliate_order(&self, row: &AffiliateOrder) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO affiliate_orders
                 (id, affiliate_id, order_id, user_id, product_id, source,
                  order_total, commission_amount, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(row.id)
        .bind(row.affiliate_id)
        .bind(row.order_id)
        .bind(row.user_id)
        .bind(row.product_id)
        .bind(row.source.as_str())
        .bind(row.order_total)
        .bind(row.commission_amount)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_affiliate_totals(
        &self,
        affiliate_id: Uuid,
        delta: AffiliateTotalsDelta,
    ) -> StoreResult<()> {
        let res = sqlx::query(
            r#"UPDATE affiliates SET
                 wallet_balance = wallet_balance + $2,
                 total_orders = total_orders + $3,
                 total_sales = total_sales + $4,
                 total_commission = total_commission + $5
               WHERE id = $1"#,
        )
        .bind(affiliate_id)
        .bind(delta.wallet_balance)
        .bind(delta.orders)
        .bind(delta.sales)
        .bind(delta.commission)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("affiliate {affiliate_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LoyaltyStore for PgStore {
    async fn deduct_coins_atomic(&self, user_id: Uuid, coins: i64) -> StoreResult<i64> {
        let updated = sqlx::query_scalar::<_, i64>(
            r#"UPDATE loyalty_wallets
               SET available = available - $2, total_redeemed = total_redeemed + $2
               WHERE user_id = $1 AND available >= $2
               RETURNING available"#,
        )
        .bind(user_id)
        .bind(coins)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(balance) => Ok(balance),
            None => {
                let available = self.wallet(user_id).await?.map(|w| w.available).unwrap_or(0);
                Err(StoreError::InsufficientBalance {
                    available,
                    requested: coins,
                })
            }
        }
    }

    async fn wallet(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"SELECT user_id, available, total_earned, total_redeemed
               FROM loyalty_wallets WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| LoyaltyWallet {
            user_id: r.user_id,
            available: r.available,
            total_earned: r.total_earned,
            total_redeemed: r.total_redeemed,
        }))
    }

    async fn swap_wallet(
        &self,
        expected: &LoyaltyWallet,
        replacement: &LoyaltyWallet,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"UPDATE loyalty_wallets
               SET available = $4, total_redeemed = $5
               WHERE user_id = $1 AND available = $2 AND total_redeemed = $3"#,
        )
        .bind(expected.user_id)
        .bind(expected.available)
        .bind(expected.total_redeemed)
        .bind(replacement.available)
        .bind(replacement.total_redeemed)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_transaction(&self, tx: &LoyaltyTransaction) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO loyalty_transactions
                 (id, user_id, order_id, kind, coins, value, balance_after, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(tx.order_id)
        .bind(&tx.kind)
        .bind(tx.coins)
        .bind(tx.value)
        .bind(tx.balance_after)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
