//! Wallet accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coinledger_core::UserId;

/// Which sub-balance of an account a movement leg touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pocket {
    /// Coins the user can spend directly.
    Spendable,
    /// Coins held against in-flight bookings.
    Escrow,
}

/// One wallet per user: a spendable balance plus an escrow sub-balance.
///
/// Both fields are unsigned; a negative balance cannot be represented, so
/// every debit must check-and-swap before writing. Accounts are created
/// lazily with zero defaults on first need and never deleted while the
/// owning user exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: u64,
    pub escrow_balance: u64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh zero-balance account.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            escrow_balance: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn pocket(&self, pocket: Pocket) -> u64 {
        match pocket {
            Pocket::Spendable => self.balance,
            Pocket::Escrow => self.escrow_balance,
        }
    }

    /// Total coins attributed to this user across both pockets.
    pub fn total(&self) -> u64 {
        self.balance + self.escrow_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_empty() {
        let account = Account::new(UserId::new());
        assert_eq!(account.balance, 0);
        assert_eq!(account.escrow_balance, 0);
        assert_eq!(account.total(), 0);
    }

    #[test]
    fn pocket_selects_the_right_field() {
        let mut account = Account::new(UserId::new());
        account.balance = 400;
        account.escrow_balance = 600;

        assert_eq!(account.pocket(Pocket::Spendable), 400);
        assert_eq!(account.pocket(Pocket::Escrow), 600);
        assert_eq!(account.total(), 1000);
    }
}
