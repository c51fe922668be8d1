//! Transaction state machine service.
//!
//! Each transition is one atomic store call running the rules in
//! [`readits_core::lifecycle`]; this layer resolves local dates, logs and notifies.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};

use readits_core::meetup::{format_twelve_hour, parse_meetup_time};
use readits_core::{
    Clock, ConfirmOutcome, MarketError, Party, PurchaseId, RentalId, Transaction,
    TransactionKind, TransactionRef, UserId, Withdrawal,
};
use readits_store::{Approval, Confirmation, Result, Store, TransferDecision, Withdrawn};

use super::messages::{Event, Subject};
use super::notify::Notifier;
use super::settlement::EscrowSettlement;

/// Drives rentals and purchases through their lifecycle.
#[derive(Clone)]
pub struct TransactionStateMachine {
    store: Arc<dyn Store>,
    settlement: EscrowSettlement,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    local_offset: FixedOffset,
}

impl TransactionStateMachine {
    /// Create the state machine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        settlement: EscrowSettlement,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            settlement,
            notifier,
            clock,
            local_offset,
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.local_offset).date_naive()
    }

    async fn announce(&self, tx: &Transaction, from: Party, event: Event) {
        Subject::load(self.store.as_ref(), tx)
            .await
            .notify(&self.notifier, from, &event);
    }

    async fn announce_to_both(&self, tx: &Transaction, event: Event) {
        Subject::load(self.store.as_ref(), tx)
            .await
            .notify_both(&self.notifier, &event);
    }

    /// Fetch a transaction the actor is a party to.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if it does not exist, `Authorization` if `actor` is not a party.
    pub async fn get(&self, tx_ref: &TransactionRef, actor: &UserId) -> Result<Transaction> {
        let tx = self
            .store
            .get_transaction(tx_ref)
            .await?
            .ok_or_else(|| MarketError::not_found(tx_ref.kind().as_str(), tx_ref.as_uuid()))?;
        tx.reservation().party_of(*actor)?;
        Ok(tx)
    }

    /// All transactions of `kind` the user takes part in, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        self.store.list_for_user(user_id, kind).await
    }

    /// Owner approves a pending reservation at `meetup_time` (`"14:30"` or `"2:30 PM"`),
    /// capturing its escrow.
    pub async fn approve(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: &str,
    ) -> Result<Approval> {
        let meetup_time = parse_meetup_time(meetup_time)?;
        let approval = self.settlement.capture(tx_ref, actor, meetup_time).await?;
        tracing::info!(transaction = %tx_ref, user_id = %actor, "reservation approved");
        self.announce(
            &approval.transaction,
            Party::Owner,
            Event::Approved {
                meetup_time: format_twelve_hour(meetup_time),
            },
        )
        .await;
        Ok(approval)
    }

    /// Owner declines a pending reservation; its escrow is released and the record deleted.
    pub async fn reject(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        reason: Option<String>,
    ) -> Result<Withdrawn> {
        let reason = reason.filter(|r| !r.trim().is_empty());
        let withdrawal = Withdrawal::Reject {
            actor: *actor,
            reason: reason.clone(),
        };
        let withdrawn = self.settlement.release(tx_ref, &withdrawal).await?;
        tracing::info!(transaction = %tx_ref, user_id = %actor, "reservation rejected");
        self.announce(&withdrawn.transaction, Party::Owner, Event::Rejected { reason })
            .await;
        Ok(withdrawn)
    }

    /// Requester withdraws a pending reservation; its escrow is released and the record
    /// deleted.
    pub async fn cancel(&self, tx_ref: &TransactionRef, actor: &UserId) -> Result<Withdrawn> {
        let withdrawal = Withdrawal::Cancel { actor: *actor };
        let withdrawn = self.settlement.release(tx_ref, &withdrawal).await?;
        tracing::info!(transaction = %tx_ref, user_id = %actor, "reservation cancelled");
        self.announce(&withdrawn.transaction, Party::Requester, Event::Cancelled)
            .await;
        Ok(withdrawn)
    }

    /// Record `actor`'s pickup confirmation. Replays are harmless.
    pub async fn confirm_pickup(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
    ) -> Result<Confirmation> {
        let confirmation = self
            .store
            .confirm_pickup(tx_ref, actor, self.today())
            .await?;
        self.after_confirmation(
            &confirmation,
            actor,
            Event::PickupConfirmed,
            Event::PickupCompleted,
        )
        .await;
        Ok(confirmation)
    }

    /// Record `actor`'s return confirmation on a rental. Replays are harmless.
    pub async fn confirm_return(
        &self,
        rental_id: &RentalId,
        actor: &UserId,
    ) -> Result<Confirmation> {
        let confirmation = self.store.confirm_return(rental_id, actor).await?;
        self.after_confirmation(
            &confirmation,
            actor,
            Event::ReturnConfirmed,
            Event::ReturnCompleted,
        )
        .await;
        Ok(confirmation)
    }

    async fn after_confirmation(
        &self,
        confirmation: &Confirmation,
        actor: &UserId,
        partial: Event,
        complete: Event,
    ) {
        let tx = &confirmation.transaction;
        tracing::info!(
            transaction = %tx.reference(),
            user_id = %actor,
            outcome = ?confirmation.outcome,
            status = %tx.status(),
            "confirmation recorded"
        );
        match confirmation.outcome {
            ConfirmOutcome::AlreadyConfirmed => {}
            ConfirmOutcome::Partial => {
                if let Ok(party) = tx.reservation().party_of(*actor) {
                    self.announce(tx, party, partial).await;
                }
            }
            ConfirmOutcome::Complete => self.announce_to_both(tx, complete).await,
        }
    }

    /// Buyer decides whether a completed purchase moves the listing to them or retires it.
    pub async fn decide_transfer(
        &self,
        purchase_id: &PurchaseId,
        actor: &UserId,
        transfer_ownership: bool,
    ) -> Result<TransferDecision> {
        let decision = self
            .store
            .decide_transfer(purchase_id, actor, transfer_ownership)
            .await?;
        tracing::info!(
            transaction = %TransactionRef::Purchase(*purchase_id),
            book_id = %decision.book.book_id,
            transfer_ownership,
            "ownership decision recorded"
        );
        self.announce(
            &Transaction::Purchase(decision.purchase.clone()),
            Party::Requester,
            Event::TransferDecided {
                transferred: transfer_ownership,
            },
        )
        .await;
        Ok(decision)
    }
}
