//! Infrastructure layer: stores, ledger engines, notifications.
//!
//! The stores persist accounts, journal entries, withdrawal requests, and the
//! booking contract (in-memory for tests/dev, Postgres for production). The
//! engines implement the value-movement semantics on top of them: conditional
//! single-row updates with bounded retry, compensating rollback, and
//! journal-backed idempotency.

pub mod escrow;
pub mod idempotency;
pub mod notify;
pub mod store;
pub mod sweeper;
pub mod transfer;
pub mod withdrawal;

#[cfg(test)]
mod integration_tests;

pub use escrow::{EscrowLifecycle, EscrowReceipt};
pub use idempotency::IdempotencyGuard;
pub use notify::{BusSink, Notification, NotificationKind, NotificationSink, NullSink, RecordingSink};
pub use store::{
    AccountStore, AccountStoreError, BookingStore, BookingStoreError, CasOutcome,
    InMemoryAccountStore, InMemoryBookingStore, InMemoryJournalStore, InMemoryWithdrawalStore,
    JournalError, JournalStore, PostgresAccountStore, PostgresBookingStore, PostgresJournalStore,
    PostgresWithdrawalStore, WithdrawalStore, WithdrawalStoreError,
};
pub use sweeper::{ExpirationRules, ExpirationSweeper, SweepFailure, SweepReport};
pub use transfer::{TransferEngine, TransferReceipt, TransferRequest, MAX_CAS_ATTEMPTS};
pub use withdrawal::WithdrawalWorkflow;
