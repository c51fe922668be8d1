//! Application state.

use std::sync::Arc;

use readits_core::Clock;
use readits_store::Store;

use crate::config::ServiceConfig;
use crate::engine::{
    EscrowSettlement, Janitor, Notifier, RatingService, ReservationFactory,
    TransactionStateMachine, WalletLedger,
};

/// Application state shared across handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Time source.
    pub clock: Arc<dyn Clock>,

    /// Outbound notification channel.
    pub notifier: Notifier,

    /// Balances and top-ups.
    pub wallets: WalletLedger,

    /// Creates pending rentals and purchases.
    pub reservations: ReservationFactory,

    /// Approvals, withdrawals, confirmations and transfer decisions.
    pub transactions: TransactionStateMachine,

    /// Ratings and trust adjustment.
    pub ratings: RatingService,

    /// Time-driven sweeps.
    pub janitor: Arc<Janitor>,
}

impl AppState {
    /// Wire every engine component over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
    ) -> Self {
        let local_offset = config.local_offset();
        let settlement = EscrowSettlement::new(store.clone(), config.escrow_policy());

        if config.jwt_secret.is_none() {
            tracing::warn!("JWT_SECRET not configured - authenticated routes will answer 401");
        }
        if config.xendit_callback_token.is_none() {
            tracing::warn!("Xendit callback token not configured - top-up webhooks will be refused");
        }

        Self {
            wallets: WalletLedger::new(store.clone()),
            reservations: ReservationFactory::new(
                store.clone(),
                notifier.clone(),
                clock.clone(),
                config.reservation_ttl(),
                local_offset,
            ),
            transactions: TransactionStateMachine::new(
                store.clone(),
                settlement.clone(),
                notifier.clone(),
                clock.clone(),
                local_offset,
            ),
            ratings: RatingService::new(store.clone(), clock.clone()),
            janitor: Arc::new(Janitor::new(
                store.clone(),
                settlement,
                notifier.clone(),
                clock.clone(),
                config.confirmation_window(),
                local_offset,
                config.janitor_interval(),
            )),
            store,
            config,
            clock,
            notifier,
        }
    }
}
