//! Order placement with affiliate attribution and commission settlement.
//!
//! Stages run in a fixed order: attribution, commission, order write,
//! settlement, loyalty redemption, referral cleanup. Only the order header
//! write can reject a checkout. A line-item failure is reported as a
//! distinct inconsistency. Everything after that is logged and tolerated.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::attribution::{self, Attribution, AttributionInput};
use crate::commission::{self, Commission, CommissionInput};
use crate::loyalty::{self, Redemption};
use crate::orders::{self, OrderWriteError};
use crate::referral::{self, ReferralCache};
use crate::settlement::{self, SettlementReport};
use crate::store::{AffiliateDirectory, CheckoutStore, StoreError};
use crate::types::{
    AttributionSource, COMMISSION_STATUS_PENDING, ORDER_STATUS_PENDING, Order, OrderLineItem,
    PAYMENT_METHOD_COD, PAYMENT_STATUS_PENDING, Paise, ShippingAddress,
};

pub const MSG_ORDER_NOT_PLACED: &str = "order could not be placed";
pub const MSG_ORDER_INCOMPLETE: &str =
    "order was received but could not be completed, our team has been notified";
pub const MSG_LOYALTY_UNCERTAIN: &str =
    "your order is placed, but your coin balance may not reflect this redemption yet";

/// Everything the storefront hands over at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderLineItem>,
    pub subtotal: Paise,
    #[serde(default)]
    pub shipping_cost: Paise,
    #[serde(default)]
    pub discount: Paise,
    #[serde(default)]
    pub coupon_discount: Paise,
    #[serde(default)]
    pub wallet_amount_used: Paise,
    #[serde(default)]
    pub loyalty_coins_used: i64,
    #[serde(default)]
    pub loyalty_coins_value: Paise,
    #[serde(default)]
    pub coins_to_earn: i64,
    pub total: Paise,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl CheckoutRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("cart is empty".into());
        }
        let mut items_total: Paise = 0;
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(format!("quantity for {} must be positive", item.name));
            }
            if item.unit_price < 0 {
                return Err(format!("price for {} must be >= 0", item.name));
            }
            let line_total = item
                .unit_price
                .checked_mul(i64::from(item.quantity))
                .ok_or_else(|| format!("line total for {} is out of range", item.name))?;
            if line_total != item.line_total {
                return Err(format!("line total for {} does not match price", item.name));
            }
            items_total = items_total
                .checked_add(line_total)
                .ok_or_else(|| "cart total is out of range".to_string())?;
        }
        let amounts = [
            ("subtotal", self.subtotal),
            ("shipping_cost", self.shipping_cost),
            ("discount", self.discount),
            ("coupon_discount", self.coupon_discount),
            ("wallet_amount_used", self.wallet_amount_used),
            ("loyalty_coins_used", self.loyalty_coins_used),
            ("loyalty_coins_value", self.loyalty_coins_value),
            ("coins_to_earn", self.coins_to_earn),
            ("total", self.total),
        ];
        if let Some((name, _)) = amounts.iter().find(|(_, v)| *v < 0) {
            return Err(format!("{name} must be >= 0"));
        }
        if self.loyalty_coins_used > 0 && self.user_id.is_none() {
            return Err("guest checkout cannot redeem loyalty coins".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutWarning {
    LoyaltyBalanceUncertain { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributionSummary {
    pub affiliate_id: Uuid,
    pub source: AttributionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub attribution: Option<AttributionSummary>,
    pub commission: Paise,
    pub shipment_created: bool,
    pub settlement: Option<SettlementReport>,
    pub warnings: Vec<CheckoutWarning>,
    /// False when the referral cache could not be cleared.
    pub referral_cleared: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("invalid checkout: {0}")]
    Invalid(String),

    #[error("order could not be placed: {0}")]
    OrderNotPlaced(#[source] StoreError),

    /// The order header exists but has no items. Needs an operator.
    #[error("order {order_number} ({order_id}) has no line items: {source}")]
    OrderWithoutItems {
        order_id: Uuid,
        order_number: String,
        referral_cleared: bool,
        #[source]
        source: StoreError,
    },
}

impl CheckoutError {
    /// Message safe to show the shopper.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::Invalid(msg) => msg.clone(),
            CheckoutError::OrderNotPlaced(_) => MSG_ORDER_NOT_PLACED.to_string(),
            CheckoutError::OrderWithoutItems { .. } => MSG_ORDER_INCOMPLETE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CheckoutSettings {
    /// How long a captured referral click stays attributable.
    pub referral_ttl: Duration,
    pub wallet_cas_attempts: u32,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            referral_ttl: Duration::days(30),
            wallet_cas_attempts: 3,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn CheckoutStore>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn CheckoutStore>, settings: CheckoutSettings) -> Self {
        Self { store, settings }
    }

    #[instrument(skip_all, fields(user_id = ?req.user_id, items = req.items.len()))]
    pub async fn place_order(
        &self,
        req: CheckoutRequest,
        referral_cache: &dyn ReferralCache,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        req.validate().map_err(CheckoutError::Invalid)?;
        let now = Utc::now();
        let store = self.store.as_ref();

        let profile_affiliate_id = match req.user_id {
            Some(user_id) => match store.profile_affiliate(user_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(%user_id, error = %e, "profile affiliate lookup failed");
                    None
                }
            },
            None => None,
        };
        let referral =
            referral::fresh_referral(referral_cache, self.settings.referral_ttl, now).await;
        let attribution = attribution::resolve_or_none(
            store,
            &AttributionInput {
                coupon_code: req.coupon_code.clone(),
                profile_affiliate_id,
                referral,
            },
        )
        .await;

        let commission = attribution
            .as_ref()
            .map(|a| {
                commission::calculate(&CommissionInput {
                    policy: a.policy,
                    source: a.source,
                    product_scope: a.product_scope,
                    items: &req.items,
                    subtotal: req.subtotal,
                    coupon_discount: req.coupon_discount,
                })
            })
            .unwrap_or(Commission::NONE);

        let order = build_order(&req, attribution.as_ref(), commission, now);
        let shipment_created = match orders::write_order(store, &order, &req.items).await {
            Ok(outcome) => outcome.shipment_created,
            Err(OrderWriteError::Header(e)) => {
                error!(error = %e, "order header write failed, checkout rejected");
                return Err(CheckoutError::OrderNotPlaced(e));
            }
            Err(OrderWriteError::LineItems { order_id, source }) => {
                let referral_cleared = referral::consume_referral(referral_cache).await;
                return Err(CheckoutError::OrderWithoutItems {
                    order_id,
                    order_number: order.order_number,
                    referral_cleared,
                    source,
                });
            }
        };

        let settlement = match &attribution {
            Some(a) => settlement::settle(store, &order, a, commission).await,
            None => None,
        };

        let mut warnings = Vec::new();
        if let Some(user_id) = order.user_id.filter(|_| order.loyalty_coins_used > 0) {
            let redemption = Redemption {
                user_id,
                order_id: order.id,
                coins: order.loyalty_coins_used,
                value: order.loyalty_coins_value,
            };
            if let Err(e) =
                loyalty::reconcile(store, &redemption, self.settings.wallet_cas_attempts).await
            {
                warn!(%user_id, order_id = %order.id, error = %e, "loyalty redemption not applied");
                warnings.push(CheckoutWarning::LoyaltyBalanceUncertain {
                    message: MSG_LOYALTY_UNCERTAIN.to_string(),
                });
            }
        }

        let referral_cleared = referral::consume_referral(referral_cache).await;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            commission = commission.amount,
            "checkout complete"
        );
        Ok(CheckoutReceipt {
            order_id: order.id,
            order_number: order.order_number,
            attribution: attribution.map(|a| AttributionSummary {
                affiliate_id: a.affiliate.id,
                source: a.source,
                product_id: a.product_scope,
            }),
            commission: commission.amount,
            shipment_created,
            settlement,
            warnings,
            referral_cleared,
        })
    }
}

fn build_order(
    req: &CheckoutRequest,
    attribution: Option<&Attribution>,
    commission: Commission,
    now: chrono::DateTime<Utc>,
) -> Order {
    let id = Uuid::new_v4();
    let owed = commission.is_owed();
    Order {
        id,
        order_number: orders::order_number(id, now),
        user_id: req.user_id,
        shipping: req.shipping.clone(),
        subtotal: req.subtotal,
        shipping_cost: req.shipping_cost,
        discount: req.discount,
        coupon_discount: req.coupon_discount,
        wallet_amount_used: req.wallet_amount_used,
        loyalty_coins_used: req.loyalty_coins_used,
        loyalty_coins_value: req.loyalty_coins_value,
        coins_to_earn: req.coins_to_earn,
        total: req.total,
        payment_method: PAYMENT_METHOD_COD.to_string(),
        payment_status: PAYMENT_STATUS_PENDING.to_string(),
        status: ORDER_STATUS_PENDING.to_string(),
        coupon_code: req.coupon_code.clone().filter(|c| !c.is_empty()),
        affiliate_id: attribution.map(|a| a.affiliate.id),
        referral_source: attribution.map(|a| a.source),
        commission_amount: owed.then_some(commission.amount),
        commission_status: owed.then(|| COMMISSION_STATUS_PENDING.to_string()),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(unit_price: Paise, quantity: i32, line_total: Paise) -> CheckoutRequest {
        CheckoutRequest {
            user_id: None,
            shipping: ShippingAddress {
                name: "Kavya".into(),
                phone: "9123456780".into(),
                line1: "7 Park Street".into(),
                line2: None,
                city: "Kolkata".into(),
                state: "WB".into(),
                postal_code: "700016".into(),
            },
            items: vec![OrderLineItem {
                product_id: Uuid::new_v4(),
                name: "Dupatta".into(),
                image_url: None,
                size: None,
                color: None,
                quantity,
                unit_price,
                line_total,
            }],
            subtotal: line_total,
            shipping_cost: 0,
            discount: 0,
            coupon_discount: 0,
            wallet_amount_used: 0,
            loyalty_coins_used: 0,
            loyalty_coins_value: 0,
            coins_to_earn: 0,
            total: line_total,
            coupon_code: None,
        }
    }

    #[test]
    fn matching_line_total_is_accepted() {
        assert!(request(25_000, 2, 50_000).validate().is_ok());
    }

    #[test]
    fn oversized_line_total_is_rejected() {
        let err = request(i64::MAX / 2 + 1, 2, 0).validate().unwrap_err();
        assert!(err.contains("out of range"), "{err}");

        // 2^62 * 4 wraps to zero; it must not slip through as a zero line.
        assert!(request(1 << 62, 4, 0).validate().is_err());
    }

    #[test]
    fn cart_total_overflow_is_rejected() {
        let mut req = request(i64::MAX / 2, 2, i64::MAX - 1);
        let second = req.items[0].clone();
        req.items.push(second);
        let err = req.validate().unwrap_err();
        assert_eq!(err, "cart total is out of range");
    }
}
