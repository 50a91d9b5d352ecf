//! Decides which affiliate, if any, is credited for a sale.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{AffiliateDirectory, StoreResult};
use crate::types::{Affiliate, AttributionSource, CommissionPolicy, ReferralState};

/// Sources in the order they are consulted. The first match wins.
pub const PRIORITY: [AttributionSource; 3] = [
    AttributionSource::Coupon,
    AttributionSource::Profile,
    AttributionSource::Link,
];

#[derive(Debug, Clone, Default)]
pub struct AttributionInput {
    pub coupon_code: Option<String>,
    pub profile_affiliate_id: Option<Uuid>,
    pub referral: Option<ReferralState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub affiliate: Affiliate,
    pub policy: CommissionPolicy,
    pub source: AttributionSource,
    /// Set only for link referrals captured on a product page.
    pub product_scope: Option<Uuid>,
}

/// Resolves attribution strictly in [`PRIORITY`] order.
///
/// Unknown or inactive affiliates are a negative answer, not an error.
/// Only infrastructure failures are returned as `Err`.
pub async fn resolve<D: AffiliateDirectory + ?Sized>(
    directory: &D,
    input: &AttributionInput,
) -> StoreResult<Option<Attribution>> {
    for source in PRIORITY {
        if let Some(attribution) = resolve_source(directory, input, source).await? {
            debug!(
                affiliate_id = %attribution.affiliate.id,
                source = source.as_str(),
                "sale attributed"
            );
            return Ok(Some(attribution));
        }
    }
    debug!("no attribution for sale");
    Ok(None)
}

/// Like [`resolve`], but a lookup failure yields no attribution.
pub async fn resolve_or_none<D: AffiliateDirectory + ?Sized>(
    directory: &D,
    input: &AttributionInput,
) -> Option<Attribution> {
    match resolve(directory, input).await {
        Ok(attribution) => attribution,
        Err(e) => {
            warn!(error = %e, "attribution lookup failed, placing order without affiliate");
            None
        }
    }
}

async fn resolve_source<D: AffiliateDirectory + ?Sized>(
    directory: &D,
    input: &AttributionInput,
    source: AttributionSource,
) -> StoreResult<Option<Attribution>> {
    let affiliate = match source {
        AttributionSource::Coupon => {
            let Some(code) = input.coupon_code.as_deref().filter(|c| !c.is_empty()) else {
                return Ok(None);
            };
            match directory.affiliate_for_coupon(code).await? {
                Some(id) => directory.affiliate_by_id(id).await?,
                None => None,
            }
        }
        AttributionSource::Profile => match input.profile_affiliate_id {
            Some(id) => directory.affiliate_by_id(id).await?,
            None => None,
        },
        AttributionSource::Link => match &input.referral {
            Some(referral) if !referral.code.is_empty() => {
                directory.affiliate_by_code(&referral.code).await?
            }
            _ => None,
        },
    };

    let Some(affiliate) = affiliate.filter(|a| a.is_active) else {
        return Ok(None);
    };

    let product_scope = match source {
        AttributionSource::Link => input.referral.as_ref().and_then(|r| r.product_id),
        _ => None,
    };

    Ok(Some(Attribution {
        policy: affiliate.policy,
        affiliate,
        source,
        product_scope,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::{MemoryStore, StoreOp};

    fn affiliate(code: &str, active: bool) -> Affiliate {
        Affiliate {
            id: Uuid::new_v4(),
            referral_code: code.into(),
            policy: CommissionPolicy::Percentage(500),
            is_active: active,
            wallet_balance: 0,
            total_orders: 0,
            total_sales: 0,
            total_commission: 0,
        }
    }

    fn referral(code: &str, product_id: Option<Uuid>) -> ReferralState {
        ReferralState {
            code: code.into(),
            captured_at: Utc::now(),
            product_id,
        }
    }

    #[tokio::test]
    async fn nothing_to_go_on_means_no_attribution() {
        let store = MemoryStore::new();
        let got = resolve(&store, &AttributionInput::default()).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn coupon_beats_profile_and_link() {
        let store = MemoryStore::new();
        let by_coupon = affiliate("COUPONER", true);
        let by_profile = affiliate("PROFILER", true);
        let by_link = affiliate("LINKER", true);
        store.bind_coupon("SAVE10", by_coupon.id, true).await;
        for a in [&by_coupon, &by_profile, &by_link] {
            store.add_affiliate(a.clone()).await;
        }

        let input = AttributionInput {
            coupon_code: Some("SAVE10".into()),
            profile_affiliate_id: Some(by_profile.id),
            referral: Some(referral("LINKER", None)),
        };
        let got = resolve(&store, &input).await.unwrap().unwrap();
        assert_eq!(got.source, AttributionSource::Coupon);
        assert_eq!(got.affiliate.id, by_coupon.id);
    }

    #[tokio::test]
    async fn inactive_coupon_binding_falls_through_to_profile() {
        let store = MemoryStore::new();
        let by_coupon = affiliate("COUPONER", true);
        let by_profile = affiliate("PROFILER", true);
        store.add_affiliate(by_coupon.clone()).await;
        store.add_affiliate(by_profile.clone()).await;
        store.bind_coupon("SAVE10", by_coupon.id, false).await;

        let input = AttributionInput {
            coupon_code: Some("SAVE10".into()),
            profile_affiliate_id: Some(by_profile.id),
            referral: None,
        };
        let got = resolve(&store, &input).await.unwrap().unwrap();
        assert_eq!(got.source, AttributionSource::Profile);
    }

    #[tokio::test]
    async fn inactive_affiliates_are_skipped() {
        let store = MemoryStore::new();
        let sleeping = affiliate("SLEEPY", false);
        let linker = affiliate("LINKER", true);
        store.add_affiliate(sleeping.clone()).await;
        store.add_affiliate(linker.clone()).await;

        let input = AttributionInput {
            coupon_code: None,
            profile_affiliate_id: Some(sleeping.id),
            referral: Some(referral("LINKER", None)),
        };
        let got = resolve(&store, &input).await.unwrap().unwrap();
        assert_eq!(got.source, AttributionSource::Link);
        assert_eq!(got.affiliate.id, linker.id);
    }

    #[tokio::test]
    async fn link_carries_product_scope() {
        let store = MemoryStore::new();
        store.add_affiliate(affiliate("LINKER", true)).await;
        let product = Uuid::new_v4();
        let input = AttributionInput {
            referral: Some(referral("LINKER", Some(product))),
            ..Default::default()
        };
        let got = resolve(&store, &input).await.unwrap().unwrap();
        assert_eq!(got.product_scope, Some(product));
    }

    #[tokio::test]
    async fn unknown_referral_code_is_not_an_error() {
        let store = MemoryStore::new();
        let input = AttributionInput {
            referral: Some(referral("NOBODY", None)),
            ..Default::default()
        };
        assert!(resolve(&store, &input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_failure_is_an_error_but_tolerated_by_checkout() {
        let store = MemoryStore::new();
        store.set_failing(StoreOp::AffiliateLookup, true).await;
        let input = AttributionInput {
            coupon_code: Some("SAVE10".into()),
            ..Default::default()
        };
        assert!(resolve(&store, &input).await.is_err());
        assert!(resolve_or_none(&store, &input).await.is_none());
    }
}
