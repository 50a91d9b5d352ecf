//! Loyalty coin redemption against a shopper's wallet.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{LoyaltyStore, StoreError};
use crate::types::{LOYALTY_TX_REDEEM, LoyaltyTransaction, LoyaltyWallet, Paise};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub coins: i64,
    pub value: Paise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductionPath {
    Atomic,
    CompareAndSwap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyOutcome {
    pub path: DeductionPath,
    pub balance_after: i64,
    pub ledger_recorded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LoyaltyError {
    #[error("no loyalty wallet for user {0}")]
    WalletMissing(Uuid),

    #[error("wallet kept changing underneath {attempts} deduction attempts")]
    Contended { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Deducts redeemed coins and appends the ledger row.
///
/// `Err` means the wallet was not changed by this call and the shopper
/// should be told their balance may be off. A ledger write failure alone
/// is reported through [`LoyaltyOutcome::ledger_recorded`].
pub async fn reconcile<S: LoyaltyStore + ?Sized>(
    store: &S,
    redemption: &Redemption,
    cas_attempts: u32,
) -> Result<LoyaltyOutcome, LoyaltyError> {
    let (path, balance_after) = match store
        .deduct_coins_atomic(redemption.user_id, redemption.coins)
        .await
    {
        Ok(balance) => (DeductionPath::Atomic, balance),
        Err(e) => {
            warn!(
                user_id = %redemption.user_id,
                error = %e,
                "atomic coin deduction failed, falling back to compare-and-swap"
            );
            let balance = deduct_with_swap(store, redemption, cas_attempts).await?;
            (DeductionPath::CompareAndSwap, balance)
        }
    };

    let entry = LoyaltyTransaction {
        id: Uuid::new_v4(),
        user_id: redemption.user_id,
        order_id: redemption.order_id,
        kind: LOYALTY_TX_REDEEM.to_string(),
        coins: redemption.coins,
        value: redemption.value,
        balance_after,
        created_at: Utc::now(),
    };
    let ledger_recorded = match store.insert_transaction(&entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                user_id = %redemption.user_id,
                order_id = %redemption.order_id,
                error = %e,
                "loyalty transaction not recorded"
            );
            false
        }
    };

    info!(
        user_id = %redemption.user_id,
        coins = redemption.coins,
        balance_after,
        ?path,
        "loyalty coins redeemed"
    );
    Ok(LoyaltyOutcome {
        path,
        balance_after,
        ledger_recorded,
    })
}

/// Read, compute, conditional write; re-read on a lost race.
///
/// The available balance is clamped at zero when the wallet holds fewer
/// coins than redeemed.
async fn deduct_with_swap<S: LoyaltyStore + ?Sized>(
    store: &S,
    redemption: &Redemption,
    attempts: u32,
) -> Result<i64, LoyaltyError> {
    let attempts = attempts.max(1);
    for _ in 0..attempts {
        let current = store
            .wallet(redemption.user_id)
            .await?
            .ok_or(LoyaltyError::WalletMissing(redemption.user_id))?;

        if current.available < redemption.coins {
            warn!(
                user_id = %redemption.user_id,
                available = current.available,
                requested = redemption.coins,
                "redemption exceeds wallet balance, clamping to zero"
            );
        }
        let next = LoyaltyWallet {
            available: (current.available - redemption.coins).max(0),
            total_redeemed: current.total_redeemed + redemption.coins,
            ..current
        };
        if store.swap_wallet(&current, &next).await? {
            return Ok(next.available);
        }
    }
    Err(LoyaltyError::Contended { attempts })
}
