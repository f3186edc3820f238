//! Ledger error model.

use thiserror::Error;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error taxonomy for ledger operations.
///
/// Duplicate reference submissions are deliberately *not* an error: engines
/// return the previously journaled result with a `replayed` marker instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Spendable balance too low for the requested debit. Terminal, user-facing.
    #[error("insufficient funds: need {needed} coins, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// Escrow sub-balance lower than the amount recorded as held. Signals a
    /// bookkeeping inconsistency; surfaced, never clamped.
    #[error("insufficient escrow: need {needed} coins, held {held}")]
    InsufficientEscrow { needed: u64, held: u64 },

    /// Conditional update kept losing to concurrent writers. Transient; the
    /// caller may retry.
    #[error("contended after {attempts} attempts, please retry")]
    Contended { attempts: u32 },

    /// A referenced account, booking, or request does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation attempted against a record not in the required state
    /// (e.g. approving an already-approved withdrawal).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A value failed validation at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn insufficient_funds(needed: u64, available: u64) -> Self {
        Self::InsufficientFunds { needed, available }
    }

    pub fn insufficient_escrow(needed: u64, held: u64) -> Self {
        Self::InsufficientEscrow { needed, held }
    }

    pub fn contended(attempts: u32) -> Self {
        Self::Contended { attempts }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller may retry the same call and expect it to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contended { .. })
    }
}
