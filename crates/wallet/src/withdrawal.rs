//! Withdrawal requests (human-gated debits).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coinledger_core::{LedgerError, LedgerResult, UserId, WithdrawalId};

/// Request lifecycle. Transitions pending→approved or pending→rejected
/// exactly once; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A talent's request to withdraw coins from their spendable balance.
///
/// Creating a request reserves nothing; the balance is re-checked at
/// approval time. Rejection never touches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub talent_id: UserId,
    pub coins: u64,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
}

impl WithdrawalRequest {
    /// New pending request. Rejects zero amounts at the boundary.
    pub fn new(talent_id: UserId, coins: u64) -> LedgerResult<Self> {
        if coins == 0 {
            return Err(LedgerError::validation(
                "withdrawal amount must be positive",
            ));
        }
        Ok(Self {
            id: WithdrawalId::new(),
            talent_id,
            coins,
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            admin_notes: None,
        })
    }
}
