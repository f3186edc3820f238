//! Store traits and their in-memory / Postgres implementations.
//!
//! Traits are synchronous (`Send + Sync`, blanket impls for `Arc<T>`). The
//! Postgres implementations expose `async` inherent methods and bridge the
//! sync trait through `tokio::runtime::Handle`, so they must be called from
//! within a tokio runtime (e.g. via `spawn_blocking` from axum handlers).

pub mod account;
pub mod booking;
pub mod journal;
pub mod withdrawal;

pub use account::{AccountStore, AccountStoreError, InMemoryAccountStore, PostgresAccountStore};
pub use booking::{BookingStore, BookingStoreError, InMemoryBookingStore, PostgresBookingStore};
pub use journal::{InMemoryJournalStore, JournalError, JournalStore, PostgresJournalStore};
pub use withdrawal::{
    InMemoryWithdrawalStore, PostgresWithdrawalStore, WithdrawalStore, WithdrawalStoreError,
};

/// Outcome of a conditional (compare-and-swap) write.
///
/// `Lost` means zero rows matched the condition: a concurrent writer changed
/// the row between the caller's read and this write. It is not an error;
/// callers decide whether to retry, skip, or compensate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Lost,
}

impl CasOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Human-readable description of a sqlx failure, tagged with the operation.
pub(crate) fn describe_sqlx_error(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            format!("database error in {}: {}", operation, db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        _ => format!("sqlx error in {operation}: {err}"),
    }
}

/// Postgres unique-constraint violation (error code 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

/// Resolve the ambient tokio runtime for bridging sync trait calls into the
/// async Postgres methods.
pub(crate) fn runtime_handle(what: &'static str) -> Result<tokio::runtime::Handle, String> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        format!("{what} requires a tokio runtime; call from within one (e.g. spawn_blocking)")
    })
}
