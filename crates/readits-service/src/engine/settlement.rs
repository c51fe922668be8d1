//! Escrow settlement.
//!
//! Capture and release each run inside the store call that performs the matching state
//! transition, so money never moves without the status moving with it.

use std::sync::Arc;

use chrono::NaiveTime;

use readits_core::{EscrowPolicy, TransactionRef, UserId, Withdrawal};
use readits_store::{Approval, Result, Store, Withdrawn};

/// Moves escrowed readits when a reservation is approved or withdrawn.
#[derive(Clone)]
pub struct EscrowSettlement {
    store: Arc<dyn Store>,
    policy: EscrowPolicy,
}

impl EscrowSettlement {
    /// Settle through `store` under `policy`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: EscrowPolicy) -> Self {
        Self { store, policy }
    }

    /// The fee policy applied to captures.
    #[must_use]
    pub fn policy(&self) -> EscrowPolicy {
        self.policy
    }

    /// Approve `tx_ref` and capture its escrow: the requester's reservation is drawn from
    /// both wallet counters and the owner is credited the payout.
    pub async fn capture(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: NaiveTime,
    ) -> Result<Approval> {
        let approval = self
            .store
            .approve(tx_ref, actor, meetup_time, self.policy)
            .await?;
        let capture = &approval.capture;
        tracing::info!(
            transaction = %tx_ref,
            payer = %capture.payer,
            payee = %capture.payee,
            amount = capture.amount,
            fee = capture.fee,
            payout = capture.payout,
            "escrow captured"
        );
        Ok(approval)
    }

    /// Release the escrow of a pending reservation and delete it.
    pub async fn release(
        &self,
        tx_ref: &TransactionRef,
        withdrawal: &Withdrawal,
    ) -> Result<Withdrawn> {
        let withdrawn = self.store.withdraw_pending(tx_ref, withdrawal).await?;
        if withdrawn.released {
            tracing::info!(
                transaction = %tx_ref,
                action = withdrawal.action(),
                amount = withdrawn.transaction.reservation().total_cost,
                "escrow released"
            );
        } else {
            tracing::warn!(
                transaction = %tx_ref,
                action = withdrawal.action(),
                "reservation removed without releasing escrow"
            );
        }
        Ok(withdrawn)
    }
}
