//! Wallet domain types and pure rules.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The
//! engines in `coinledger-infra` apply these rules against real stores.

pub mod account;
pub mod booking;
pub mod gift;
pub mod journal;
pub mod packages;
pub mod withdrawal;

pub use account::{Account, Pocket};
pub use booking::{Booking, BookingStatus};
pub use gift::{GIFT_MAX_COINS, GIFT_MESSAGE_MAX_CHARS, GIFT_MIN_COINS, validate_gift};
pub use journal::{EntryKind, EntryStatus, JournalEntry, NewJournalEntry, short_id};
pub use packages::{COIN_PACKAGES, CoinPackage, package_for_purchase};
pub use withdrawal::{WithdrawalRequest, WithdrawalStatus};
