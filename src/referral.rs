//! Referral state captured on a shopper's device.
//!
//! Click tracking writes it; checkout reads it for link attribution and
//! clears it once an order has consumed the click.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{StoreError, StoreResult};
use crate::types::ReferralState;

#[async_trait]
pub trait ReferralCache: Send + Sync {
    async fn get(&self) -> StoreResult<Option<ReferralState>>;

    /// Drops the code, its capture time and any product scope.
    async fn clear(&self) -> StoreResult<()>;
}

/// Device-local cache held in process memory.
#[derive(Default)]
pub struct MemoryReferralCache {
    state: Mutex<Option<ReferralState>>,
    cleared: Mutex<bool>,
    clear_fails: Mutex<bool>,
}

impl MemoryReferralCache {
    pub fn new(state: Option<ReferralState>) -> Self {
        Self {
            state: Mutex::new(state),
            cleared: Mutex::new(false),
            clear_fails: Mutex::new(false),
        }
    }

    /// Records a click. Later captures replace earlier ones.
    pub async fn capture(&self, code: &str, product_id: Option<Uuid>) {
        *self.state.lock().await = Some(ReferralState {
            code: code.to_string(),
            captured_at: Utc::now(),
            product_id,
        });
    }

    pub async fn was_cleared(&self) -> bool {
        *self.cleared.lock().await
    }

    /// Makes every later `clear` fail and leave the state in place.
    pub async fn fail_clears(&self) {
        *self.clear_fails.lock().await = true;
    }
}

#[async_trait]
impl ReferralCache for MemoryReferralCache {
    async fn get(&self) -> StoreResult<Option<ReferralState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn clear(&self) -> StoreResult<()> {
        if *self.clear_fails.lock().await {
            return Err(StoreError::Unavailable("referral cache".into()));
        }
        *self.state.lock().await = None;
        *self.cleared.lock().await = true;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReferralRow {
    code: String,
    captured_at: DateTime<Utc>,
    product_id: Option<Uuid>,
}

/// Referral state persisted per device id, for checkouts placed server-side.
pub struct DeviceReferralCache {
    pool: PgPool,
    device_id: String,
}

impl DeviceReferralCache {
    pub fn new(pool: PgPool, device_id: impl Into<String>) -> Self {
        Self {
            pool,
            device_id: device_id.into(),
        }
    }
}

#[async_trait]
impl ReferralCache for DeviceReferralCache {
    async fn get(&self) -> StoreResult<Option<ReferralState>> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"SELECT code, captured_at, product_id FROM referral_states WHERE device_id = $1"#,
        )
        .bind(&self.device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ReferralState {
            code: r.code,
            captured_at: r.captured_at,
            product_id: r.product_id,
        }))
    }

    async fn clear(&self) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM referral_states WHERE device_id = $1"#)
            .bind(&self.device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Reads the cached referral, treating clicks older than `ttl` as absent.
///
/// A read failure counts as "no referral": it must never block a sale.
pub async fn fresh_referral(
    cache: &dyn ReferralCache,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Option<ReferralState> {
    match cache.get().await {
        Ok(Some(state)) if now - state.captured_at <= ttl => Some(state),
        Ok(Some(state)) => {
            debug!(code = %state.code, captured_at = %state.captured_at, "ignoring stale referral");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "referral cache read failed, continuing without link attribution");
            None
        }
    }
}

/// Clears the cache, logging instead of failing. Returns whether it was cleared.
pub async fn consume_referral(cache: &dyn ReferralCache) -> bool {
    match cache.clear().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to clear referral state");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(age_days: i64, now: DateTime<Utc>) -> ReferralState {
        ReferralState {
            code: "ASHA10".into(),
            captured_at: now - Duration::days(age_days),
            product_id: None,
        }
    }

    #[tokio::test]
    async fn fresh_referral_is_returned() {
        let now = Utc::now();
        let cache = MemoryReferralCache::new(Some(state(3, now)));
        let got = fresh_referral(&cache, Duration::days(30), now).await;
        assert_eq!(got.map(|s| s.code), Some("ASHA10".to_string()));
    }

    #[tokio::test]
    async fn stale_referral_is_ignored() {
        let now = Utc::now();
        let cache = MemoryReferralCache::new(Some(state(31, now)));
        assert!(fresh_referral(&cache, Duration::days(30), now).await.is_none());
    }

    #[test]
    fn clear_drops_state_and_records_it() {
        tokio_test::block_on(async {
            let cache = MemoryReferralCache::default();
            cache.capture("ASHA10", Some(Uuid::new_v4())).await;
            assert!(cache.get().await.unwrap().is_some());

            assert!(consume_referral(&cache).await);
            assert!(cache.get().await.unwrap().is_none());
            assert!(cache.was_cleared().await);
        });
    }

    #[tokio::test]
    async fn failed_clear_is_reported_and_keeps_state() {
        let cache = MemoryReferralCache::default();
        cache.capture("ASHA10", None).await;
        cache.fail_clears().await;

        assert!(!consume_referral(&cache).await);
        assert!(cache.get().await.unwrap().is_some());
        assert!(!cache.was_cleared().await);
    }
}
