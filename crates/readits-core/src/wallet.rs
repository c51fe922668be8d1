//! Readits wallets and the audit ledger.
//!
//! A wallet tracks two counters. `balance` is what the user owns; `reserved_amount` is
//! the part of it earmarked for pending or approved transactions. Reserving does not
//! subtract from `balance`: settlement later draws both counters down together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerEntryId, UserId, WalletId};

/// One readits wallet per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet id.
    pub wallet_id: WalletId,

    /// Owning user.
    pub user_id: UserId,

    /// Funds owned by the user.
    pub balance: i64,

    /// Funds earmarked for unsettled transactions.
    pub reserved_amount: i64,

    /// Last mutation time.
    pub last_updated: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            wallet_id: WalletId::generate(),
            user_id,
            balance: 0,
            reserved_amount: 0,
            last_updated: Utc::now(),
        }
    }

    /// Funds not yet earmarked by any reservation.
    #[must_use]
    pub fn available(&self) -> i64 {
        self.balance - self.reserved_amount
    }

    /// Whether a new reservation of `amount` fits in the unreserved balance.
    #[must_use]
    pub fn can_reserve(&self, amount: i64) -> bool {
        self.available() >= amount
    }

    /// Whether the settlement guard (`reserved >= amount AND balance >= amount`) holds.
    #[must_use]
    pub fn can_settle(&self, amount: i64) -> bool {
        self.reserved_amount >= amount && self.balance >= amount
    }
}

/// An immutable audit record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id (ULID, time-ordered).
    pub id: LedgerEntryId,

    /// Wallet the entry belongs to.
    pub wallet_id: WalletId,

    /// Owner of the wallet.
    pub user_id: UserId,

    /// Signed amount: positive credits the wallet, negative debits it.
    pub amount: i64,

    /// What caused the change.
    pub entry_type: LedgerEntryType,

    /// External or internal reference (payment id, rental id, ...).
    pub reference: Option<String>,

    /// When the change happened.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build an entry for `wallet`, forcing the amount's sign from the entry type.
    #[must_use]
    pub fn new(
        wallet: &Wallet,
        amount: i64,
        entry_type: LedgerEntryType,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let amount = if entry_type.is_credit() {
            amount.abs()
        } else {
            -amount.abs()
        };
        Self {
            id: LedgerEntryId::generate(),
            wallet_id: wallet.wallet_id,
            user_id: wallet.user_id,
            amount,
            entry_type,
            reference,
            created_at,
        }
    }
}

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Readits bought through the payment provider.
    TopUp,
    /// Renter's captured rental cost.
    RentalPayment,
    /// Owner's payout for a rental.
    RentalEarning,
    /// Buyer's captured purchase cost.
    PurchasePayment,
    /// Owner's payout for a sale.
    SaleEarning,
}

impl LedgerEntryType {
    /// Whether this entry adds funds.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(self, Self::TopUp | Self::RentalEarning | Self::SaleEarning)
    }

    /// Stable string form, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopUp => "top_up",
            Self::RentalPayment => "rental_payment",
            Self::RentalEarning => "rental_earning",
            Self::PurchasePayment => "purchase_payment",
            Self::SaleEarning => "sale_earning",
        }
    }
}

impl std::str::FromStr for LedgerEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(Self::TopUp),
            "rental_payment" => Ok(Self::RentalPayment),
            "rental_earning" => Ok(Self::RentalEarning),
            "purchase_payment" => Ok(Self::PurchasePayment),
            "sale_earning" => Ok(Self::SaleEarning),
            other => Err(format!("unknown ledger entry type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(UserId::generate());
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.reserved_amount, 0);
        assert_eq!(wallet.available(), 0);
    }

    #[test]
    fn reservation_and_settlement_guards() {
        let mut wallet = Wallet::new(UserId::generate());
        wallet.balance = 500;
        wallet.reserved_amount = 100;

        assert!(wallet.can_reserve(400));
        assert!(!wallet.can_reserve(401));
        assert!(wallet.can_settle(100));
        assert!(!wallet.can_settle(101));
    }

    #[test]
    fn ledger_sign_follows_entry_type() {
        let wallet = Wallet::new(UserId::generate());
        let now = Utc::now();

        let payment = LedgerEntry::new(&wallet, 100, LedgerEntryType::PurchasePayment, None, now);
        let earning = LedgerEntry::new(&wallet, -100, LedgerEntryType::SaleEarning, None, now);

        assert_eq!(payment.amount, -100);
        assert_eq!(earning.amount, 100);
    }
}
