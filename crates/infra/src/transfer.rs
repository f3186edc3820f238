//! Value movement between accounts.
//!
//! The engine moves a fixed amount between spendable balances with the
//! conditional-update discipline: read, check, write back with the read
//! value in the condition, retry a bounded number of times on a lost race.
//! Multi-step movements compensate before returning an error, so a caller
//! never observes a half-applied transfer.

use std::sync::Arc;

use tracing::{error, instrument};
use uuid::Uuid;

use coinledger_core::{LedgerError, LedgerResult, UserId};
use coinledger_wallet::{EntryKind, JournalEntry, NewJournalEntry, Pocket};

use crate::idempotency::IdempotencyGuard;
use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{AccountStore, CasOutcome, JournalError, JournalStore};

/// Read-check-write attempts before giving up with `Contended`.
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// A two-legged movement: debit `from`, credit `to`.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: UserId,
    pub to: UserId,
    pub coins: u64,
    pub kind: EntryKind,
    /// Idempotency key, carried on the debit entry.
    pub reference: Option<String>,
    pub related: Option<Uuid>,
    pub description: Option<String>,
}

impl TransferRequest {
    pub fn new(from: UserId, to: UserId, coins: u64, kind: EntryKind) -> Self {
        Self {
            from,
            to,
            coins,
            kind,
            reference: None,
            related: None,
            description: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_related(mut self, related: impl Into<Uuid>) -> Self {
        self.related = Some(related.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a credit or transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// The reference-carrying entry: the debit for two-legged transfers, the
    /// credit itself for one-legged credits.
    pub entry: JournalEntry,
    /// The other party's entry. Absent on replay (the original counterpart
    /// is not re-fetched) and for one-legged credits.
    pub counterpart: Option<JournalEntry>,
    /// True when a duplicate submission returned the prior result instead of
    /// re-applying.
    pub replayed: bool,
}

impl TransferReceipt {
    fn applied(entry: JournalEntry, counterpart: Option<JournalEntry>) -> Self {
        Self {
            entry,
            counterpart,
            replayed: false,
        }
    }

    fn replayed(entry: JournalEntry) -> Self {
        Self {
            entry,
            counterpart: None,
            replayed: true,
        }
    }
}

/// Debit `pocket` of `user` by `amount` under the conditional-update
/// discipline. Shared by every debit leg in the ledger.
pub(crate) fn debit_with_retry<A: AccountStore>(
    accounts: &A,
    user: UserId,
    pocket: Pocket,
    amount: u64,
) -> LedgerResult<()> {
    for _attempt in 1..=MAX_CAS_ATTEMPTS {
        let account = accounts.get_or_create(user)?;
        let current = account.pocket(pocket);

        if current < amount {
            return Err(match pocket {
                Pocket::Spendable => LedgerError::insufficient_funds(amount, current),
                Pocket::Escrow => LedgerError::insufficient_escrow(amount, current),
            });
        }

        match accounts.compare_and_set(user, pocket, current, current - amount)? {
            CasOutcome::Applied => return Ok(()),
            CasOutcome::Lost => continue,
        }
    }

    Err(LedgerError::contended(MAX_CAS_ATTEMPTS))
}

/// The movement primitive underlying gifts, premium unlocks, and webhook
/// credits.
pub struct TransferEngine<A, J> {
    accounts: A,
    journal: J,
    guard: IdempotencyGuard<J>,
    sink: Arc<dyn NotificationSink>,
}

impl<A, J> TransferEngine<A, J>
where
    A: AccountStore,
    J: JournalStore + Clone,
{
    pub fn new(accounts: A, journal: J, sink: Arc<dyn NotificationSink>) -> Self {
        let guard = IdempotencyGuard::new(journal.clone());
        Self {
            accounts,
            journal,
            guard,
            sink,
        }
    }

    /// One-legged credit, used by payment webhooks. Idempotent on
    /// `reference`; lazily creates the account.
    #[instrument(
        skip(self, description),
        fields(user_id = %user, coins, kind = kind.as_str(), reference),
        err
    )]
    pub fn credit(
        &self,
        user: UserId,
        coins: u64,
        kind: EntryKind,
        reference: &str,
        description: Option<String>,
    ) -> LedgerResult<TransferReceipt> {
        if coins == 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }

        if let Some(existing) = self.guard.completed_reference(reference)? {
            return Ok(TransferReceipt::replayed(existing));
        }

        self.accounts.credit(user, Pocket::Spendable, coins)?;

        let mut entry = NewJournalEntry::credit(user, coins, kind)?.with_reference(reference);
        if let Some(description) = description {
            entry = entry.with_description(description);
        }

        let entry = match self.journal.append(entry) {
            Ok(entry) => entry,
            Err(JournalError::DuplicateReference(_)) => {
                // Lost the reference race to a concurrent submission after
                // the pre-check; undo our credit and return the winner's
                // result.
                if let Err(comp) =
                    debit_with_retry(&self.accounts, user, Pocket::Spendable, coins)
                {
                    // The duplicate credit may already be spent. The residue
                    // has no journal entry, so this log is the only thing
                    // tying it to the reference.
                    error!(
                        user_id = %user,
                        coins,
                        reference,
                        error = %comp,
                        "failed to reverse duplicate credit"
                    );
                    return Err(comp);
                }
                let existing = self.guard.completed_reference(reference)?.ok_or_else(|| {
                    LedgerError::storage(format!(
                        "reference {reference} reported duplicate but no completed entry found"
                    ))
                })?;
                return Ok(TransferReceipt::replayed(existing));
            }
            Err(e) => {
                // The credit landed without a record; a retry of the
                // reference would pass the pre-check and credit again. Take
                // the coins back before surfacing the failure.
                if let Err(comp) =
                    debit_with_retry(&self.accounts, user, Pocket::Spendable, coins)
                {
                    error!(
                        user_id = %user,
                        coins,
                        reference,
                        error = %comp,
                        "failed to reverse unjournaled credit"
                    );
                }
                return Err(e.into());
            }
        };

        self.notify_credited(user, coins, kind, entry.description.clone());
        Ok(TransferReceipt::applied(entry, None))
    }

    /// Move `coins` from one spendable balance to another.
    ///
    /// Success leaves the sum of the two balances unchanged; failure leaves
    /// no partial state. A supplied `reference` makes the call idempotent; a
    /// premium unlock is additionally idempotent on (unlocker, media).
    #[instrument(
        skip(self, req),
        fields(
            from = %req.from,
            to = %req.to,
            coins = req.coins,
            kind = req.kind.as_str()
        ),
        err
    )]
    pub fn transfer(&self, req: TransferRequest) -> LedgerResult<TransferReceipt> {
        if req.coins == 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }
        if req.from == req.to {
            return Err(LedgerError::validation(
                "cannot transfer to the same account",
            ));
        }

        if let Some(reference) = &req.reference {
            if let Some(existing) = self.guard.completed_reference(reference)? {
                return Ok(TransferReceipt::replayed(existing));
            }
        }
        // A repeat unlock of the same media returns the prior result, not a
        // second debit.
        if req.kind == EntryKind::PremiumUnlock {
            if let Some(related) = req.related {
                if let Some(existing) =
                    self.guard.completed_related(req.from, req.kind, related)?
                {
                    return Ok(TransferReceipt::replayed(existing));
                }
            }
        }

        debit_with_retry(&self.accounts, req.from, Pocket::Spendable, req.coins)?;

        if let Err(credit_err) = self.accounts.credit(req.to, Pocket::Spendable, req.coins) {
            // Credit leg failed after the debit landed: put the coins back
            // and journal the attempt as failed.
            self.accounts.credit(req.from, Pocket::Spendable, req.coins)?;
            let failed = self.debit_entry(&req)?.failed();
            if let Err(journal_err) = self.journal.append(failed) {
                error!(error = %journal_err, "failed to journal compensated transfer");
            }
            return Err(credit_err.into());
        }

        let debit = match self.journal.append(self.debit_entry(&req)?) {
            Ok(entry) => entry,
            Err(JournalError::DuplicateReference(_)) => {
                // A concurrent submission with the same reference won; the
                // movement is theirs now, so reverse ours.
                self.reverse_movement(&req)?;

                let reference = req.reference.as_deref().unwrap_or_default();
                let existing = self.guard.completed_reference(reference)?.ok_or_else(|| {
                    LedgerError::storage(format!(
                        "reference {reference} reported duplicate but no completed entry found"
                    ))
                })?;
                return Ok(TransferReceipt::replayed(existing));
            }
            Err(e) => {
                // Both legs landed with no record to replay from; a retry
                // would apply the transfer a second time. Reverse the
                // movement so the error matches the books.
                if let Err(comp) = self.reverse_movement(&req) {
                    error!(
                        from = %req.from,
                        to = %req.to,
                        coins = req.coins,
                        error = %comp,
                        "failed to reverse unjournaled transfer"
                    );
                }
                return Err(e.into());
            }
        };

        let mut credit_entry = NewJournalEntry::credit(req.to, req.coins, req.kind)?
            .with_counterparty(req.from);
        if let Some(related) = req.related {
            credit_entry = credit_entry.with_related(related);
        }
        if let Some(description) = &req.description {
            credit_entry = credit_entry.with_description(description.clone());
        }

        let counterpart = match self.journal.append(credit_entry) {
            Ok(entry) => Some(entry),
            Err(e) => {
                // The movement and the debit entry stand; the credited
                // party's entry is missing from the audit trail.
                error!(error = %e, "failed to journal credit side of transfer");
                None
            }
        };

        self.notify_credited(req.to, req.coins, req.kind, req.description.clone());
        Ok(TransferReceipt::applied(debit, counterpart))
    }

    /// Put an applied movement back: debit the credited side, re-credit the
    /// debited side.
    fn reverse_movement(&self, req: &TransferRequest) -> LedgerResult<()> {
        debit_with_retry(&self.accounts, req.to, Pocket::Spendable, req.coins)?;
        self.accounts.credit(req.from, Pocket::Spendable, req.coins)?;
        Ok(())
    }

    fn debit_entry(&self, req: &TransferRequest) -> LedgerResult<NewJournalEntry> {
        let mut entry = NewJournalEntry::debit(req.from, req.coins, req.kind)?
            .with_counterparty(req.to);
        if let Some(reference) = &req.reference {
            entry = entry.with_reference(reference.clone());
        }
        if let Some(related) = req.related {
            entry = entry.with_related(related);
        }
        if let Some(description) = &req.description {
            entry = entry.with_description(description.clone());
        }
        Ok(entry)
    }

    fn notify_credited(
        &self,
        user: UserId,
        coins: u64,
        kind: EntryKind,
        description: Option<String>,
    ) {
        let (notification_kind, title) = match kind {
            EntryKind::Purchase => (NotificationKind::PurchaseCredited, "Coins credited"),
            EntryKind::Gift => (NotificationKind::GiftReceived, "Gift received"),
            EntryKind::PremiumUnlock => (NotificationKind::MediaUnlocked, "Media unlocked"),
            // Booking and withdrawal movements notify from their own
            // engines with richer context.
            _ => return,
        };

        let body = description.unwrap_or_else(|| format!("You received {coins} coins"));
        self.sink
            .notify(Notification::new(user, notification_kind, title, body));
    }
}
