//! Journal entries (append-only movement log).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coinledger_core::{EntryId, LedgerError, LedgerResult, UserId};

/// What kind of value movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Purchase,
    Gift,
    PremiumUnlock,
    Booking,
    Refund,
    Payout,
    Withdrawal,
}

impl EntryKind {
    /// Stable wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Gift => "gift",
            Self::PremiumUnlock => "premium_unlock",
            Self::Booking => "booking",
            Self::Refund => "refund",
            Self::Payout => "payout",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "gift" => Some(Self::Gift),
            "premium_unlock" => Some(Self::PremiumUnlock),
            "booking" => Some(Self::Booking),
            "refund" => Some(Self::Refund),
            "payout" => Some(Self::Payout),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

/// Entry lifecycle status.
///
/// `Failed` entries record terminal multi-step failures for audit; they do
/// not count towards idempotency, so a failed reference may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Failed,
    Pending,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Immutable record of a completed or failed movement.
///
/// `signed_coins` is positive for credits and negative for debits, from the
/// perspective of `user_id`. Entries are never mutated or deleted; a
/// `reference`, once journaled as completed, is never journaled again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub signed_coins: i64,
    pub kind: EntryKind,
    pub status: EntryStatus,
    /// Externally-supplied idempotency key (payment reference, gift id, ...).
    pub reference: Option<String>,
    /// Booking / media / withdrawal the movement relates to.
    pub related_entity: Option<Uuid>,
    /// The other party of a two-legged transfer.
    pub counterparty: Option<UserId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a journal entry. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub user_id: UserId,
    pub signed_coins: i64,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub reference: Option<String>,
    pub related_entity: Option<Uuid>,
    pub counterparty: Option<UserId>,
    pub description: Option<String>,
}

impl NewJournalEntry {
    /// Completed credit entry (`coins` added to `user_id`).
    pub fn credit(user_id: UserId, coins: u64, kind: EntryKind) -> LedgerResult<Self> {
        Ok(Self {
            user_id,
            signed_coins: signed(coins)?,
            kind,
            status: EntryStatus::Completed,
            reference: None,
            related_entity: None,
            counterparty: None,
            description: None,
        })
    }

    /// Completed debit entry (`coins` removed from `user_id`).
    pub fn debit(user_id: UserId, coins: u64, kind: EntryKind) -> LedgerResult<Self> {
        Ok(Self {
            user_id,
            signed_coins: -signed(coins)?,
            kind,
            status: EntryStatus::Completed,
            reference: None,
            related_entity: None,
            counterparty: None,
            description: None,
        })
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_related(mut self, related: impl Into<Uuid>) -> Self {
        self.related_entity = Some(related.into());
        self
    }

    pub fn with_counterparty(mut self, counterparty: UserId) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = EntryStatus::Failed;
        self
    }
}

fn signed(coins: u64) -> LedgerResult<i64> {
    if coins == 0 {
        return Err(LedgerError::validation("amount must be positive"));
    }
    i64::try_from(coins).map_err(|_| LedgerError::validation("amount too large"))
}

/// Short display form of an id, as used in journal descriptions
/// ("... booking #0192f3a1").
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
