//! Order header, line items and shipment stub, written in that order.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{OrderStore, StoreError};
use crate::types::{Order, OrderLineItem, SHIPMENT_STATUS_PENDING, Shipment};

pub const RECONCILE_MISSING_ITEMS: &str = "line items could not be written";

#[derive(Debug, thiserror::Error)]
pub enum OrderWriteError {
    /// Nothing was written.
    #[error("order header write failed: {0}")]
    Header(#[source] StoreError),

    /// The header exists without its items.
    #[error("order {order_id} saved without line items: {source}")]
    LineItems {
        order_id: Uuid,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderWriteOutcome {
    pub shipment_created: bool,
}

/// Human-readable order number: `ORD-YYYYMMDD-XXXXXXXX`.
pub fn order_number(order_id: Uuid, at: DateTime<Utc>) -> String {
    let simple = order_id.simple().to_string().to_uppercase();
    format!("ORD-{}-{}", at.format("%Y%m%d"), &simple[..8])
}

pub async fn write_order<S: OrderStore + ?Sized>(
    store: &S,
    order: &Order,
    items: &[OrderLineItem],
) -> Result<OrderWriteOutcome, OrderWriteError> {
    store
        .insert_order(order)
        .await
        .map_err(OrderWriteError::Header)?;

    if let Err(source) = store.insert_line_items(order.id, items).await {
        error!(
            order_id = %order.id,
            order_number = %order.order_number,
            item_count = items.len(),
            error = %source,
            "order header saved but line items failed, operator reconciliation required"
        );
        if let Err(e) = store
            .flag_for_reconciliation(order.id, RECONCILE_MISSING_ITEMS)
            .await
        {
            error!(order_id = %order.id, error = %e, "could not flag order for reconciliation");
        }
        return Err(OrderWriteError::LineItems {
            order_id: order.id,
            source,
        });
    }

    let shipment = Shipment {
        id: Uuid::new_v4(),
        order_id: order.id,
        status: SHIPMENT_STATUS_PENDING.to_string(),
    };
    let shipment_created = match store.insert_shipment(&shipment).await {
        Ok(()) => true,
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "shipment stub not created");
            false
        }
    };

    info!(order_id = %order.id, order_number = %order.order_number, "order written");
    Ok(OrderWriteOutcome { shipment_created })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn order_number_uses_date_and_id_prefix() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(order_number(id, at), "ORD-20240309-3F2A9C1E");
    }
}
