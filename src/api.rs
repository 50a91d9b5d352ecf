use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::checkout::{AttributionSummary, CheckoutRequest, CheckoutService, CheckoutWarning};
use crate::error::{ApiError, ApiErrorWithMeta, E_DB_FAILURE, E_NOT_FOUND, checkout_error};
use crate::referral::{DeviceReferralCache, MemoryReferralCache, ReferralCache};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::store::{AffiliateDirectory, CheckoutStore, LoyaltyStore};
use crate::types::{Affiliate, LoyaltyWallet, Paise, ReferralState};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// Storage behind the checkout workflow.
    pub store: Arc<dyn CheckoutStore>,
    pub checkout: CheckoutService,
    /// Needed for per-device referral state; absent when running without Postgres.
    pub pool: Option<PgPool>,
}

/// The checkout request as sent by the storefront.
#[derive(Deserialize)]
pub struct CheckoutBody {
    #[serde(flatten)]
    pub order: CheckoutRequest,
    /// Device whose stored referral click should be used.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Referral held by the client itself, used when no device id is sent.
    #[serde(default)]
    pub referral: Option<ReferralState>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub commission: Paise,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionSummary>,
    /// Tells the client to drop its cached referral.
    pub referral_cleared: bool,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/checkout", post(checkout_handler))
        .route("/affiliates/{id}", get(get_affiliate_handler))
        .route("/wallets/{user_id}", get(get_wallet_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn checkout_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<CheckoutBody>,
) -> Result<ApiOk<CheckoutResponse>, ApiErrorWithMeta> {
    let inline = MemoryReferralCache::new(body.referral);
    let device = match (body.device_id, &st.pool) {
        (Some(device_id), Some(pool)) => Some(DeviceReferralCache::new(pool.clone(), device_id)),
        _ => None,
    };
    let cache: &dyn ReferralCache = match &device {
        Some(device) => device,
        None => &inline,
    };

    let receipt = st
        .checkout
        .place_order(body.order, cache)
        .await
        .map_err(|e| checkout_error(e, meta.clone()))?;

    let warnings = receipt
        .warnings
        .iter()
        .map(|w| match w {
            CheckoutWarning::LoyaltyBalanceUncertain { message } => message.clone(),
        })
        .collect::<Vec<_>>();

    Ok(ApiOk::created(
        "order placed",
        CheckoutResponse {
            order_id: receipt.order_id,
            order_number: receipt.order_number,
            commission: receipt.commission,
            attribution: receipt.attribution,
            referral_cleared: receipt.referral_cleared,
        },
        meta,
    )
    .warn(warnings))
}

async fn get_affiliate_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Affiliate>, ApiErrorWithMeta> {
    let affiliate = st.store.affiliate_by_id(id).await.map_err(|e| {
        ApiError::Internal(e.into())
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE)
    })?;

    match affiliate {
        Some(affiliate) => Ok(ApiOk::ok("affiliate fetched", affiliate, meta)),
        None => Err(ApiError::NotFound("affiliate not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND)),
    }
}

async fn get_wallet_handler(
    State(st): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<LoyaltyWallet>, ApiErrorWithMeta> {
    let wallet = st.store.wallet(user_id).await.map_err(|e| {
        ApiError::Internal(e.into())
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE)
    })?;

    let wallet = wallet.unwrap_or(LoyaltyWallet {
        user_id,
        available: 0,
        total_earned: 0,
        total_redeemed: 0,
    });
    Ok(ApiOk::ok("wallet fetched", wallet, meta))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use chrono::Utc;

    use super::*;
    use crate::checkout::CheckoutSettings;
    use crate::store::MemoryStore;
    use crate::types::{CommissionPolicy, OrderLineItem, ShippingAddress};

    fn meta() -> RequestMeta {
        RequestMeta {
            request_id: "req-1".into(),
            request_at: Utc::now().to_rfc3339(),
            timestamp: Utc::now().timestamp(),
        }
    }

    fn state(store: Arc<MemoryStore>) -> AppState {
        AppState {
            checkout: CheckoutService::new(store.clone(), CheckoutSettings::default()),
            store,
            pool: None,
        }
    }

    fn body(referral: Option<ReferralState>) -> CheckoutBody {
        let product_id = Uuid::new_v4();
        CheckoutBody {
            order: CheckoutRequest {
                user_id: None,
                shipping: ShippingAddress {
                    name: "Meera".into(),
                    phone: "9876543210".into(),
                    line1: "12 MG Road".into(),
                    line2: None,
                    city: "Pune".into(),
                    state: "MH".into(),
                    postal_code: "411001".into(),
                },
                items: vec![OrderLineItem {
                    product_id,
                    name: "Saree".into(),
                    image_url: None,
                    size: None,
                    color: Some("red".into()),
                    quantity: 2,
                    unit_price: 25_000,
                    line_total: 50_000,
                }],
                subtotal: 50_000,
                shipping_cost: 0,
                discount: 0,
                coupon_discount: 0,
                wallet_amount_used: 0,
                loyalty_coins_used: 0,
                loyalty_coins_value: 0,
                coins_to_earn: 5,
                total: 50_000,
                coupon_code: None,
            },
            device_id: None,
            referral,
        }
    }

    #[tokio::test]
    async fn checkout_with_inline_referral_credits_affiliate() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_affiliate(Affiliate {
                id: Uuid::new_v4(),
                referral_code: "RIYA".into(),
                policy: CommissionPolicy::Flat(2_500),
                is_active: true,
                wallet_balance: 0,
                total_orders: 0,
                total_sales: 0,
                total_commission: 0,
            })
            .await;
        let referral = ReferralState {
            code: "RIYA".into(),
            captured_at: Utc::now(),
            product_id: None,
        };

        let ok = checkout_handler(
            State(state(store.clone())),
            Extension(meta()),
            Json(body(Some(referral))),
        )
        .await
        .unwrap_or_else(|_| panic!("checkout rejected"));
        let response = ok.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.commissions().await[0].commission_amount, 2_500);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut b = body(None);
        b.order.items.clear();
        let err = checkout_handler(State(state(store.clone())), Extension(meta()), Json(b))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_affiliate_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = get_affiliate_handler(
            State(state(store)),
            Path(Uuid::new_v4()),
            Extension(meta()),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
