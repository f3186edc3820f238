//! Booking contract (consumed read-mostly by the ledger).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coinledger_core::{BookingId, UserId};

/// Booking lifecycle status.
///
/// The ledger only ever transitions two edges itself: payment_pending→pending
/// when the escrow hold lands, and a non-terminal status→expired from the
/// sweeper. Everything else belongs to the booking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PaymentPending,
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Stable wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentPending => "payment_pending",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_pending" => Some(Self::PaymentPending),
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A booking as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: UserId,
    pub talent_id: UserId,
    /// Price locked at creation time; the escrow hold amount equals this
    /// exactly.
    pub total_price: u64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}
