//! Escrow capture planning.
//!
//! Approval captures the requester's reservation and pays the owner in one step. The
//! plan is computed here so every store backend moves the same amounts.

use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TransactionKind};
use crate::wallet::LedgerEntryType;
use crate::UserId;

/// Basis points in one whole.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Platform fee applied to captured escrow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPolicy {
    /// Fee in basis points of the captured amount, rounded down.
    pub platform_fee_bps: u32,
}

impl EscrowPolicy {
    /// Fee retained on `amount`.
    #[must_use]
    pub fn fee_on(&self, amount: i64) -> i64 {
        let bps = i64::from(self.platform_fee_bps).min(BPS_DENOMINATOR);
        amount * bps / BPS_DENOMINATOR
    }
}

/// The money movement performed when a reservation is approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Requester whose reservation is captured.
    pub payer: UserId,
    /// Owner who is paid.
    pub payee: UserId,
    /// Amount drawn from both of the payer's counters.
    pub amount: i64,
    /// Retained by the platform.
    pub fee: i64,
    /// Credited to the payee: `amount - fee`.
    pub payout: i64,
    /// Ledger type for the payer's entry.
    pub debit_type: LedgerEntryType,
    /// Ledger type for the payee's entry.
    pub credit_type: LedgerEntryType,
    /// Ledger reference, the transaction in `kind:id` form.
    pub reference: String,
}

impl Capture {
    /// Plan the capture of `tx` under `policy`.
    #[must_use]
    pub fn plan(tx: &Transaction, policy: EscrowPolicy) -> Self {
        let reservation = tx.reservation();
        let amount = reservation.total_cost;
        let fee = policy.fee_on(amount);
        let (debit_type, credit_type) = match tx.kind() {
            TransactionKind::Rental => {
                (LedgerEntryType::RentalPayment, LedgerEntryType::RentalEarning)
            }
            TransactionKind::Purchase => {
                (LedgerEntryType::PurchasePayment, LedgerEntryType::SaleEarning)
            }
        };
        Self {
            payer: reservation.requester_id,
            payee: reservation.original_owner_id,
            amount,
            fee,
            payout: amount - fee,
            debit_type,
            credit_type,
            reference: tx.reference().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rounds_down_and_is_capped() {
        assert_eq!(EscrowPolicy::default().fee_on(999), 0);
        assert_eq!(EscrowPolicy { platform_fee_bps: 250 }.fee_on(999), 24);
        assert_eq!(EscrowPolicy { platform_fee_bps: 20_000 }.fee_on(100), 100);
    }
}
