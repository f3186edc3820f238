//! Journal-backed idempotency checks.

use uuid::Uuid;

use coinledger_core::{LedgerResult, UserId};
use coinledger_wallet::{EntryKind, JournalEntry};

use crate::store::JournalStore;

/// Detects already-applied operations by consulting the journal.
///
/// Two disciplines, matching the two ways duplicates arrive:
///
/// - **reference**: an externally-supplied key (payment reference); unique
///   among non-failed entries, so one completed entry settles the question.
/// - **related entity**: operations keyed to a booking or media item where
///   no external reference exists; the (user, kind, related) triple
///   identifies a prior application.
///
/// The guard only reads. The write-side race (two writers passing the check
/// simultaneously) is closed by the journal's uniqueness constraint, which
/// engines resolve into a replay after compensating.
pub struct IdempotencyGuard<J> {
    journal: J,
}

impl<J: JournalStore> IdempotencyGuard<J> {
    pub fn new(journal: J) -> Self {
        Self { journal }
    }

    /// The completed entry for `reference`, if the reference was already
    /// processed.
    pub fn completed_reference(&self, reference: &str) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.journal.find_completed_by_reference(reference)?)
    }

    /// The completed `kind` entry for `user_id` related to `related`, if the
    /// operation was already applied.
    pub fn completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.journal.find_completed_related(user_id, kind, related)?)
    }
}
