//! Commission settlement for an attributed order.
//!
//! Three independent writes. A failure in one is logged and the others
//! still run; the order itself is never affected.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attribution::Attribution;
use crate::commission::Commission;
use crate::store::CommissionLedger;
use crate::types::{
    AffiliateCommission, AffiliateOrder, AffiliateTotalsDelta, COMMISSION_STATUS_PENDING, Order,
};

/// Which settlement writes went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub commission_recorded: bool,
    pub affiliate_order_recorded: bool,
    pub totals_updated: bool,
}

impl SettlementReport {
    pub fn is_complete(&self) -> bool {
        self.commission_recorded && self.affiliate_order_recorded && self.totals_updated
    }
}

pub async fn settle<L: CommissionLedger + ?Sized>(
    ledger: &L,
    order: &Order,
    attribution: &Attribution,
    commission: Commission,
) -> Option<SettlementReport> {
    if !commission.is_owed() {
        return None;
    }
    let affiliate_id = attribution.affiliate.id;
    let now = Utc::now();

    let entry = AffiliateCommission {
        id: Uuid::new_v4(),
        affiliate_id,
        order_id: order.id,
        policy: attribution.policy,
        order_amount: commission.basis,
        commission_amount: commission.amount,
        status: COMMISSION_STATUS_PENDING.to_string(),
        created_at: now,
    };
    let commission_recorded = match ledger.insert_commission(&entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%affiliate_id, order_id = %order.id, error = %e, "commission entry not recorded");
            false
        }
    };

    let audit = AffiliateOrder {
        id: Uuid::new_v4(),
        affiliate_id,
        order_id: order.id,
        user_id: order.user_id,
        product_id: attribution.product_scope,
        source: attribution.source,
        order_total: order.total,
        commission_amount: commission.amount,
        created_at: now,
    };
    let affiliate_order_recorded = match ledger.insert_affiliate_order(&audit).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                %affiliate_id,
                order_id = %order.id,
                error = %e,
                "affiliate order audit not recorded"
            );
            false
        }
    };

    let delta = AffiliateTotalsDelta {
        wallet_balance: commission.amount,
        orders: 1,
        sales: order.total,
        commission: commission.amount,
    };
    let totals_updated = match ledger.increment_affiliate_totals(affiliate_id, delta).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%affiliate_id, order_id = %order.id, error = %e, "affiliate totals not updated");
            false
        }
    };

    let report = SettlementReport {
        commission_recorded,
        affiliate_order_recorded,
        totals_updated,
    };
    if report.is_complete() {
        info!(
            %affiliate_id,
            order_id = %order.id,
            amount = commission.amount,
            "commission settled"
        );
    }
    Some(report)
}
