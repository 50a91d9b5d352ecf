//! Commission calculation for attributed orders.

use uuid::Uuid;

use crate::types::{AttributionSource, CommissionPolicy, OrderLineItem, Paise};

/// Basis points in 100%.
pub const BASIS_POINTS: i64 = 10_000;

/// What a commission is computed from.
#[derive(Debug, Clone, Copy)]
pub struct CommissionInput<'a> {
    pub policy: CommissionPolicy,
    pub source: AttributionSource,
    pub product_scope: Option<Uuid>,
    pub items: &'a [OrderLineItem],
    pub subtotal: Paise,
    pub coupon_discount: Paise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commission {
    pub basis: Paise,
    pub amount: Paise,
}

impl Commission {
    pub const NONE: Commission = Commission { basis: 0, amount: 0 };

    pub fn is_owed(&self) -> bool {
        self.amount > 0
    }
}

/// `amount × bp / 10_000`, rounded half up to the nearest paisa.
pub fn percent_of(amount: Paise, basis_points: i64) -> Paise {
    let scaled = amount as i128 * basis_points as i128;
    let denom = BASIS_POINTS as i128;
    ((scaled + denom / 2) / denom) as i64
}

/// Amount the commission is computed against.
///
/// Product-scoped link referrals only count lines for the scoped product.
pub fn commission_basis(input: &CommissionInput<'_>) -> Paise {
    match (input.source, input.product_scope) {
        (AttributionSource::Link, Some(product_id)) => input
            .items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.line_total)
            .fold(0, Paise::saturating_add),
        _ => input.subtotal.saturating_sub(input.coupon_discount).max(0),
    }
}

pub fn calculate(input: &CommissionInput<'_>) -> Commission {
    let basis = commission_basis(input);
    if basis <= 0 {
        return Commission::NONE;
    }
    let amount = match input.policy {
        CommissionPolicy::Percentage(bp) => percent_of(basis, bp.max(0)),
        CommissionPolicy::Flat(value) => value.max(0),
    };
    Commission { basis, amount }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: Uuid, line_total: Paise) -> OrderLineItem {
        OrderLineItem {
            product_id,
            name: "Kurta".into(),
            image_url: None,
            size: Some("M".into()),
            color: None,
            quantity: 1,
            unit_price: line_total,
            line_total,
        }
    }

    fn input<'a>(
        policy: CommissionPolicy,
        source: AttributionSource,
        items: &'a [OrderLineItem],
    ) -> CommissionInput<'a> {
        CommissionInput {
            policy,
            source,
            product_scope: None,
            items,
            subtotal: items.iter().map(|i| i.line_total).sum(),
            coupon_discount: 0,
        }
    }

    #[test]
    fn percent_rounds_half_up_to_paisa() {
        assert_eq!(percent_of(99_999, 1000), 10_000);
        assert_eq!(percent_of(99_995, 1000), 10_000);
        assert_eq!(percent_of(99_994, 1000), 9_999);
        assert_eq!(percent_of(0, 1000), 0);
    }

    #[test]
    fn scoped_link_counts_only_scoped_product() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = [item(a, 50_000), item(b, 30_000)];
        let mut inp = input(CommissionPolicy::Percentage(1000), AttributionSource::Link, &items);
        inp.product_scope = Some(a);
        assert_eq!(commission_basis(&inp), 50_000);

        let pricier_b = [item(a, 50_000), item(b, 9_000_000)];
        inp.items = &pricier_b;
        assert_eq!(commission_basis(&inp), 50_000);
    }

    #[test]
    fn scope_is_ignored_for_coupon_source() {
        let a = Uuid::new_v4();
        let items = [item(a, 50_000), item(Uuid::new_v4(), 30_000)];
        let mut inp = input(CommissionPolicy::Percentage(1000), AttributionSource::Coupon, &items);
        inp.product_scope = Some(a);
        inp.coupon_discount = 10_000;
        assert_eq!(commission_basis(&inp), 70_000);
    }

    #[test]
    fn coupon_discount_larger_than_subtotal_yields_nothing() {
        let items = [item(Uuid::new_v4(), 10_000)];
        let mut inp = input(CommissionPolicy::Flat(5_000), AttributionSource::Profile, &items);
        inp.coupon_discount = 20_000;
        assert_eq!(calculate(&inp), Commission::NONE);
    }

    #[test]
    fn flat_fee_ignores_basis_size() {
        let small = [item(Uuid::new_v4(), 1)];
        let large = [item(Uuid::new_v4(), 10_000_000)];
        let policy = CommissionPolicy::Flat(5_000);
        assert_eq!(calculate(&input(policy, AttributionSource::Link, &small)).amount, 5_000);
        assert_eq!(calculate(&input(policy, AttributionSource::Link, &large)).amount, 5_000);
    }

    #[test]
    fn scoped_product_absent_from_cart_owes_nothing() {
        let items = [item(Uuid::new_v4(), 50_000)];
        let mut inp = input(CommissionPolicy::Flat(5_000), AttributionSource::Link, &items);
        inp.product_scope = Some(Uuid::new_v4());
        assert!(!calculate(&inp).is_owed());
    }

    #[test]
    fn scoped_basis_saturates_instead_of_wrapping() {
        let a = Uuid::new_v4();
        let items = [item(a, i64::MAX), item(a, i64::MAX)];
        let inp = CommissionInput {
            policy: CommissionPolicy::Flat(5_000),
            source: AttributionSource::Link,
            product_scope: Some(a),
            items: &items,
            subtotal: i64::MAX,
            coupon_discount: 0,
        };
        assert_eq!(commission_basis(&inp), i64::MAX);
    }

    #[test]
    fn coupon_scenario_commission() {
        let items = [item(Uuid::new_v4(), 100_000)];
        let mut inp = input(CommissionPolicy::Percentage(500), AttributionSource::Coupon, &items);
        inp.coupon_discount = 10_000;
        assert_eq!(
            calculate(&inp),
            Commission {
                basis: 90_000,
                amount: 4_500
            }
        );
    }
}
