//! Time-driven janitor.
//!
//! One cycle runs three sweeps for each transaction kind:
//!
//! 1. expire `pending` reservations past `reservation_expires_at`, releasing escrow
//! 2. open the pickup window of `approved` records whose meetup is within the lead time
//! 3. open the return window of `ongoing` rentals whose return meetup is within the lead time
//!
//! Each row is its own atomic store call. A row that fails is logged and counted and the
//! sweep moves on. A row that another caller moved first is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;

use readits_core::meetup::{local_instant, within_lead};
use readits_core::{
    Clock, Party, Phase, Transaction, TransactionKind, TransactionStatus, Withdrawal,
};
use readits_store::{Result, Store, StoreError};

use super::messages::{Event, Subject};
use super::notify::Notifier;
use super::settlement::EscrowSettlement;

/// Counts from one janitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending reservations deleted after expiry.
    pub expired: usize,
    /// Records moved to `awaiting_pickup_confirmation`.
    pub pickup_windows_opened: usize,
    /// Rentals moved to `awaiting_return_confirmation`.
    pub return_windows_opened: usize,
    /// Rows that failed and were left for the next cycle.
    pub errors: usize,
}

impl SweepReport {
    /// Whether the cycle changed or failed anything.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

enum RowOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Periodic sweeper for time-based transitions.
pub struct Janitor {
    store: Arc<dyn Store>,
    settlement: EscrowSettlement,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    lead: chrono::Duration,
    local_offset: FixedOffset,
    interval: Duration,
}

impl Janitor {
    /// Create a janitor that opens confirmation windows `lead` ahead of meetups and sweeps
    /// every `interval`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        settlement: EscrowSettlement,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        lead: chrono::Duration,
        local_offset: FixedOffset,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            settlement,
            notifier,
            clock,
            lead,
            local_offset,
            interval,
        }
    }

    /// Sweep until `shutdown` flips to `true`. A failed cycle is logged and the loop
    /// waits for the next tick.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "janitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.is_idle() => tracing::debug!("janitor cycle idle"),
                        Ok(report) => tracing::info!(
                            expired = report.expired,
                            pickup_windows_opened = report.pickup_windows_opened,
                            return_windows_opened = report.return_windows_opened,
                            errors = report.errors,
                            "janitor cycle finished"
                        ),
                        Err(err) => tracing::error!(error = %err, "janitor cycle failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("janitor stopped");
    }

    /// Run every sweep once.
    ///
    /// # Errors
    ///
    /// Returns an error only if a listing query fails. Failures on individual rows are
    /// counted in [`SweepReport::errors`].
    pub async fn run_cycle(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for kind in TransactionKind::ALL {
            for tx in self.store.list_by_status(kind, TransactionStatus::Pending).await? {
                if tx.reservation().reservation_expires_at > now {
                    continue;
                }
                match self.expire(&tx, now).await {
                    RowOutcome::Applied => report.expired += 1,
                    RowOutcome::Skipped => {}
                    RowOutcome::Failed => report.errors += 1,
                }
            }

            for tx in self.store.list_by_status(kind, TransactionStatus::Approved).await? {
                if !self.meetup_is_near(&tx, tx.reservation().meetup.date, now) {
                    continue;
                }
                match self.open_window(&tx, Phase::Pickup, now).await {
                    RowOutcome::Applied => report.pickup_windows_opened += 1,
                    RowOutcome::Skipped => {}
                    RowOutcome::Failed => report.errors += 1,
                }
            }
        }

        for tx in self
            .store
            .list_by_status(TransactionKind::Rental, TransactionStatus::Ongoing)
            .await?
        {
            let Transaction::Rental(rental) = &tx else {
                continue;
            };
            let Some(end) = rental.rent_end_date else {
                continue;
            };
            if !self.meetup_is_near(&tx, end, now) {
                continue;
            }
            match self.open_window(&tx, Phase::Return, now).await {
                RowOutcome::Applied => report.return_windows_opened += 1,
                RowOutcome::Skipped => {}
                RowOutcome::Failed => report.errors += 1,
            }
        }

        Ok(report)
    }

    fn meetup_is_near(&self, tx: &Transaction, date: NaiveDate, now: DateTime<Utc>) -> bool {
        tx.reservation()
            .meetup
            .time
            .and_then(|time| local_instant(date, time, self.local_offset))
            .is_some_and(|instant| within_lead(instant, now, self.lead))
    }

    async fn expire(&self, tx: &Transaction, now: DateTime<Utc>) -> RowOutcome {
        let tx_ref = tx.reference();
        match self
            .settlement
            .release(&tx_ref, &Withdrawal::Expire { now })
            .await
        {
            Ok(withdrawn) => {
                tracing::info!(transaction = %tx_ref, "reservation expired");
                Subject::load(self.store.as_ref(), &withdrawn.transaction)
                    .await
                    .notify(&self.notifier, Party::Owner, &Event::Expired);
                RowOutcome::Applied
            }
            Err(err) => Self::row_failed(tx, "expire", &err),
        }
    }

    async fn open_window(&self, tx: &Transaction, phase: Phase, now: DateTime<Utc>) -> RowOutcome {
        let tx_ref = tx.reference();
        match self
            .store
            .begin_confirmation_window(&tx_ref, phase, now)
            .await
        {
            Ok(Some(updated)) => {
                tracing::info!(transaction = %tx_ref, ?phase, "confirmation window opened");
                let reminder = match phase {
                    Phase::Pickup => Event::PickupReminder,
                    Phase::Return => Event::ReturnReminder,
                };
                Subject::load(self.store.as_ref(), &updated)
                    .await
                    .notify_both(&self.notifier, &reminder);
                RowOutcome::Applied
            }
            Ok(None) => RowOutcome::Skipped,
            Err(err) => Self::row_failed(tx, "open confirmation window", &err),
        }
    }

    fn row_failed(tx: &Transaction, action: &str, err: &StoreError) -> RowOutcome {
        if let StoreError::Domain(rule) = err {
            tracing::debug!(
                transaction = %tx.reference(),
                action,
                reason = %rule,
                "row moved on before the sweep reached it"
            );
            return RowOutcome::Skipped;
        }
        tracing::error!(
            transaction = %tx.reference(),
            action,
            error = %err,
            "janitor row failed"
        );
        RowOutcome::Failed
    }
}
