//! Wallet ledger.
//!
//! Thin layer over the store's wallet calls that adds input checks and the logging the
//! escrow guards require. Every mutation is a single atomic store call.

use std::sync::Arc;

use serde::Serialize;

use readits_core::{LedgerEntry, MarketError, UserId, Wallet};
use readits_store::{Result, Store, StoreError};

/// Result of a top-up credit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopUp {
    /// The wallet was credited.
    Credited {
        /// Wallet after the credit.
        wallet: Wallet,
    },
    /// The payment reference had already been credited; nothing changed.
    AlreadyProcessed,
}

/// Per-user balances and their audit trail.
#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn Store>,
}

impl WalletLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The user's wallet, opened empty on first access.
    pub async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.store.open_wallet(user_id).await
    }

    /// Earmark `amount` of the user's balance.
    pub async fn reserve(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        ensure_positive(amount)?;
        self.store.reserve_funds(user_id, amount).await
    }

    /// Drop an earmark of `amount`.
    ///
    /// A failing guard (`reserved_amount < amount`) changes nothing, is logged as a data
    /// integrity warning and returns `None`.
    pub async fn release(&self, user_id: &UserId, amount: i64) -> Result<Option<Wallet>> {
        ensure_positive(amount)?;
        let released = self.store.release_funds(user_id, amount).await?;
        if released.is_none() {
            tracing::warn!(
                user_id = %user_id,
                amount,
                "release guard failed: reserved amount is below the release"
            );
        }
        Ok(released)
    }

    /// Draw `amount` from both counters.
    ///
    /// Fails with `InsufficientFunds` unless both `reserved_amount` and `balance` cover it.
    pub async fn deduct_and_release(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        ensure_positive(amount)?;
        self.store.deduct_reserved(user_id, amount).await
    }

    /// Credit a paid top-up once per external payment reference.
    pub async fn credit_top_up(
        &self,
        user_id: &UserId,
        amount: i64,
        payment_ref: &str,
    ) -> Result<TopUp> {
        ensure_positive(amount)?;
        match self.store.credit_top_up(user_id, amount, payment_ref).await {
            Ok(wallet) => {
                tracing::info!(
                    user_id = %user_id,
                    amount,
                    payment_ref,
                    balance = wallet.balance,
                    "wallet topped up"
                );
                Ok(TopUp::Credited { wallet })
            }
            Err(StoreError::Domain(MarketError::DuplicatePayment { .. })) => {
                tracing::info!(payment_ref, "top-up already processed");
                Ok(TopUp::AlreadyProcessed)
            }
            Err(err) => Err(err),
        }
    }

    /// Append an audit entry.
    pub async fn record_transaction(&self, entry: &LedgerEntry) -> Result<()> {
        self.store.record_entry(entry).await
    }

    /// A page of the user's ledger, newest first.
    pub async fn history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.store.list_ledger(user_id, limit, offset).await
    }
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(MarketError::validation("amount must be positive").into());
    }
    Ok(())
}
