use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary amount in paise (1 rupee = 100 paise).
pub type Paise = i64;

pub const PAYMENT_METHOD_COD: &str = "cod";
pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const ORDER_STATUS_PENDING: &str = "pending";
pub const SHIPMENT_STATUS_PENDING: &str = "pending";
pub const COMMISSION_STATUS_PENDING: &str = "pending";
pub const LOYALTY_TX_REDEEM: &str = "redeem";

/// How an affiliate is paid for an attributed sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CommissionPolicy {
    /// Rate in basis points of the commissionable basis (10% = 1000).
    Percentage(i64),
    /// Fixed amount per attributed order.
    Flat(Paise),
}

impl CommissionPolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            CommissionPolicy::Percentage(_) => "percentage",
            CommissionPolicy::Flat(_) => "flat",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            CommissionPolicy::Percentage(bp) => *bp,
            CommissionPolicy::Flat(v) => *v,
        }
    }

    /// Rebuilds a policy from its stored `(type, value)` columns.
    pub fn from_parts(kind: &str, value: i64) -> Option<Self> {
        match kind {
            "percentage" => Some(CommissionPolicy::Percentage(value)),
            "flat" => Some(CommissionPolicy::Flat(value)),
            _ => None,
        }
    }
}

/// Where an attribution came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSource {
    Coupon,
    Profile,
    Link,
}

impl AttributionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionSource::Coupon => "coupon",
            AttributionSource::Profile => "profile",
            AttributionSource::Link => "link",
        }
    }
}

/// A referring partner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Affiliate {
    pub id: Uuid,
    pub referral_code: String,
    pub policy: CommissionPolicy,
    pub is_active: bool,
    pub wallet_balance: Paise,
    pub total_orders: i64,
    pub total_sales: Paise,
    pub total_commission: Paise,
}

/// Additive change applied to an affiliate's running aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffiliateTotalsDelta {
    pub wallet_balance: Paise,
    pub orders: i64,
    pub sales: Paise,
    pub commission: Paise,
}

/// Order header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub shipping: ShippingAddress,
    pub subtotal: Paise,
    pub shipping_cost: Paise,
    pub discount: Paise,
    pub coupon_discount: Paise,
    pub wallet_amount_used: Paise,
    pub loyalty_coins_used: i64,
    pub loyalty_coins_value: Paise,
    pub coins_to_earn: i64,
    pub total: Paise,
    pub payment_method: String,
    pub payment_status: String,
    pub status: String,
    pub coupon_code: Option<String>,
    pub affiliate_id: Option<Uuid>,
    pub referral_source: Option<AttributionSource>,
    pub commission_amount: Option<Paise>,
    pub commission_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// One purchased product variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: Paise,
    pub line_total: Paise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
}

/// Commission ledger row, one per attributed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffiliateCommission {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub order_id: Uuid,
    pub policy: CommissionPolicy,
    pub order_amount: Paise,
    pub commission_amount: Paise,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Reporting row joining affiliate, order, shopper and scoped product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffiliateOrder {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub source: AttributionSource,
    pub order_total: Paise,
    pub commission_amount: Paise,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoyaltyWallet {
    pub user_id: Uuid,
    pub available: i64,
    pub total_earned: i64,
    pub total_redeemed: i64,
}

/// Append-only loyalty ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoyaltyTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub kind: String,
    pub coins: i64,
    pub value: Paise,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Referral captured on a device when the shopper followed an affiliate link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralState {
    pub code: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}
