//! Escrow lifecycle: hold, release, refund.
//!
//! Funds move between a client's spendable balance and escrow sub-balance,
//! and from escrow to a talent's spendable balance, keyed to the booking's
//! lifecycle. Each terminal transition is idempotent on the journal: the
//! (party, kind, booking) triple identifies a prior application.

use std::sync::Arc;

use tracing::{error, instrument};
use uuid::Uuid;

use coinledger_core::{BookingId, LedgerError, LedgerResult, UserId};
use coinledger_wallet::{
    Booking, BookingStatus, EntryKind, JournalEntry, NewJournalEntry, Pocket, short_id,
};

use crate::idempotency::IdempotencyGuard;
use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{AccountStore, BookingStore, CasOutcome, JournalStore};
use crate::transfer::debit_with_retry;

/// Result of an escrow operation.
#[derive(Debug, Clone)]
pub struct EscrowReceipt {
    pub entry: JournalEntry,
    pub replayed: bool,
}

pub struct EscrowLifecycle<A, J, B> {
    accounts: A,
    journal: J,
    bookings: B,
    guard: IdempotencyGuard<J>,
    sink: Arc<dyn NotificationSink>,
}

impl<A, J, B> EscrowLifecycle<A, J, B>
where
    A: AccountStore,
    J: JournalStore + Clone,
    B: BookingStore,
{
    pub fn new(accounts: A, journal: J, bookings: B, sink: Arc<dyn NotificationSink>) -> Self {
        let guard = IdempotencyGuard::new(journal.clone());
        Self {
            accounts,
            journal,
            bookings,
            guard,
            sink,
        }
    }

    fn booking(&self, id: BookingId) -> LedgerResult<Booking> {
        self.bookings
            .get(id)?
            .ok_or_else(|| LedgerError::not_found("booking", id))
    }

    /// The client's completed hold entry for this booking, if the hold was
    /// already applied.
    fn hold_entry(&self, booking: &Booking) -> LedgerResult<Option<JournalEntry>> {
        self.guard
            .completed_related(booking.client_id, EntryKind::Booking, Uuid::from(booking.id))
    }

    /// Hold the booking's price in escrow, performed at payment time.
    ///
    /// Debits the client's spendable balance and credits their escrow
    /// pocket, then transitions the booking payment_pending→pending. If the
    /// transition is lost to a concurrent writer the movement is reversed.
    #[instrument(skip(self), fields(booking_id = %booking_id), err)]
    pub fn hold(&self, booking_id: BookingId) -> LedgerResult<EscrowReceipt> {
        let booking = self.booking(booking_id)?;

        if let Some(existing) = self.hold_entry(&booking)? {
            return Ok(EscrowReceipt {
                entry: existing,
                replayed: true,
            });
        }

        if booking.status != BookingStatus::PaymentPending {
            return Err(LedgerError::invalid_state(format!(
                "booking #{} is not awaiting payment (status: {})",
                short_id(booking_id.as_uuid()),
                booking.status.as_str()
            )));
        }

        let price = booking.total_price;
        debit_with_retry(&self.accounts, booking.client_id, Pocket::Spendable, price)?;
        self.accounts
            .credit(booking.client_id, Pocket::Escrow, price)?;

        let transition = self.bookings.transition(
            booking_id,
            BookingStatus::PaymentPending,
            BookingStatus::Pending,
        )?;
        if transition == CasOutcome::Lost {
            // Someone else moved the booking while our funds were in
            // flight; put them back.
            self.return_hold_to_spendable(&booking, price)?;
            return Err(LedgerError::invalid_state(format!(
                "booking #{} is no longer payable",
                short_id(booking_id.as_uuid())
            )));
        }

        let entry = match self.journal.append(
            NewJournalEntry::debit(booking.client_id, price, EntryKind::Booking)?
                .with_related(booking_id)
                .with_counterparty(booking.talent_id)
                .with_description(format!(
                    "Payment held in escrow for booking #{}",
                    short_id(booking_id.as_uuid())
                )),
        ) {
            Ok(entry) => entry,
            Err(e) => {
                // Without a hold entry the funds are invisible to release
                // and refund; unwind the whole payment so it can be retried.
                if let Err(comp) = self.return_hold_to_spendable(&booking, price) {
                    error!(
                        booking_id = %booking_id,
                        error = %comp,
                        "failed to reverse unjournaled hold"
                    );
                }
                match self.bookings.transition(
                    booking_id,
                    BookingStatus::Pending,
                    BookingStatus::PaymentPending,
                ) {
                    Ok(CasOutcome::Applied) => {}
                    Ok(CasOutcome::Lost) => error!(
                        booking_id = %booking_id,
                        "booking moved on before the hold could be unwound"
                    ),
                    Err(t) => error!(
                        booking_id = %booking_id,
                        error = %t,
                        "failed to restore booking status after unjournaled hold"
                    ),
                }
                return Err(e.into());
            }
        };

        self.sink.notify(Notification::new(
            booking.talent_id,
            NotificationKind::BookingPaid,
            "Booking paid",
            format!(
                "Booking #{} was paid and is awaiting your confirmation",
                short_id(booking_id.as_uuid())
            ),
        ));

        Ok(EscrowReceipt {
            entry,
            replayed: false,
        })
    }

    /// Pay the held amount out to the talent on booking completion.
    ///
    /// Idempotent: a completed talent entry for this booking means the
    /// payout already happened, so a second invocation (scheduled job plus a
    /// manual fix, say) returns the prior result without a double payout.
    #[instrument(skip(self), fields(booking_id = %booking_id), err)]
    pub fn release(&self, booking_id: BookingId) -> LedgerResult<EscrowReceipt> {
        let booking = self.booking(booking_id)?;

        if let Some(existing) = self.guard.completed_related(
            booking.talent_id,
            EntryKind::Booking,
            Uuid::from(booking_id),
        )? {
            return Ok(EscrowReceipt {
                entry: existing,
                replayed: true,
            });
        }

        if booking.status != BookingStatus::Completed {
            return Err(LedgerError::invalid_state(format!(
                "booking #{} is not completed (status: {})",
                short_id(booking_id.as_uuid()),
                booking.status.as_str()
            )));
        }

        if self.hold_entry(&booking)?.is_none() {
            return Err(LedgerError::invalid_state(format!(
                "no escrow held for booking #{}",
                short_id(booking_id.as_uuid())
            )));
        }

        let price = booking.total_price;
        self.debit_escrow(&booking, price)?;
        self.accounts
            .credit(booking.talent_id, Pocket::Spendable, price)?;

        let entry = match self.journal.append(
            NewJournalEntry::credit(booking.talent_id, price, EntryKind::Booking)?
                .with_related(booking_id)
                .with_counterparty(booking.client_id)
                .with_description(format!(
                    "Earnings from completed booking #{}",
                    short_id(booking_id.as_uuid())
                )),
        ) {
            Ok(entry) => entry,
            Err(e) => {
                // Without the talent entry a retried release would pay out
                // again; put the coins back in escrow.
                if let Err(comp) = self.restore_escrow(booking.talent_id, &booking, price) {
                    error!(
                        booking_id = %booking_id,
                        error = %comp,
                        "failed to reverse unjournaled payout"
                    );
                }
                return Err(e.into());
            }
        };

        self.sink.notify(Notification::new(
            booking.talent_id,
            NotificationKind::EarningsReleased,
            "Earnings released",
            format!(
                "You earned {price} coins from booking #{}",
                short_id(booking_id.as_uuid())
            ),
        ));

        Ok(EscrowReceipt {
            entry,
            replayed: false,
        })
    }

    /// Return the held amount to the client on cancellation or expiry.
    ///
    /// Idempotent on the client's refund entry for this booking.
    #[instrument(skip(self, reason), fields(booking_id = %booking_id), err)]
    pub fn refund(&self, booking_id: BookingId, reason: &str) -> LedgerResult<EscrowReceipt> {
        let booking = self.booking(booking_id)?;

        if let Some(existing) = self.guard.completed_related(
            booking.client_id,
            EntryKind::Refund,
            Uuid::from(booking_id),
        )? {
            return Ok(EscrowReceipt {
                entry: existing,
                replayed: true,
            });
        }

        if !matches!(
            booking.status,
            BookingStatus::Cancelled | BookingStatus::Expired
        ) {
            return Err(LedgerError::invalid_state(format!(
                "booking #{} is not cancelled or expired (status: {})",
                short_id(booking_id.as_uuid()),
                booking.status.as_str()
            )));
        }

        if self.hold_entry(&booking)?.is_none() {
            return Err(LedgerError::invalid_state(format!(
                "no escrow held for booking #{}",
                short_id(booking_id.as_uuid())
            )));
        }

        let price = booking.total_price;
        self.debit_escrow(&booking, price)?;
        self.accounts
            .credit(booking.client_id, Pocket::Spendable, price)?;

        let entry = match self.journal.append(
            NewJournalEntry::credit(booking.client_id, price, EntryKind::Refund)?
                .with_related(booking_id)
                .with_description(reason.to_string()),
        ) {
            Ok(entry) => entry,
            Err(e) => {
                // Without the refund entry a retry (the sweeper included)
                // would refund again; put the coins back in escrow.
                if let Err(comp) = self.restore_escrow(booking.client_id, &booking, price) {
                    error!(
                        booking_id = %booking_id,
                        error = %comp,
                        "failed to reverse unjournaled refund"
                    );
                }
                return Err(e.into());
            }
        };

        self.sink.notify(Notification::new(
            booking.client_id,
            NotificationKind::BookingRefunded,
            "Booking refunded",
            format!(
                "{price} coins were returned to your wallet for booking #{}",
                short_id(booking_id.as_uuid())
            ),
        ));

        Ok(EscrowReceipt {
            entry,
            replayed: false,
        })
    }

    /// Move a held amount from the client's escrow pocket back to their
    /// spendable balance.
    fn return_hold_to_spendable(&self, booking: &Booking, price: u64) -> LedgerResult<()> {
        debit_with_retry(&self.accounts, booking.client_id, Pocket::Escrow, price)?;
        self.accounts
            .credit(booking.client_id, Pocket::Spendable, price)?;
        Ok(())
    }

    /// Undo a release or refund leg: debit the spendable credit from
    /// `paid_user` and put the coins back in the client's escrow pocket.
    fn restore_escrow(&self, paid_user: UserId, booking: &Booking, price: u64) -> LedgerResult<()> {
        debit_with_retry(&self.accounts, paid_user, Pocket::Spendable, price)?;
        self.accounts
            .credit(booking.client_id, Pocket::Escrow, price)?;
        Ok(())
    }

    /// Conditional escrow debit. A shortfall is a bookkeeping inconsistency:
    /// surfaced, logged at error level, never clamped.
    fn debit_escrow(&self, booking: &Booking, price: u64) -> LedgerResult<()> {
        match debit_with_retry(&self.accounts, booking.client_id, Pocket::Escrow, price) {
            Err(e @ LedgerError::InsufficientEscrow { .. }) => {
                error!(
                    booking_id = %booking.id,
                    client_id = %booking.client_id,
                    error = %e,
                    "escrow shortfall detected"
                );
                Err(e)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;

    use coinledger_core::UserId;
    use coinledger_wallet::EntryStatus;

    use crate::notify::RecordingSink;
    use crate::store::{
        InMemoryAccountStore, InMemoryBookingStore, InMemoryJournalStore, JournalError,
    };

    struct Fixture {
        accounts: Arc<InMemoryAccountStore>,
        journal: Arc<InMemoryJournalStore>,
        bookings: Arc<InMemoryBookingStore>,
        sink: Arc<RecordingSink>,
        escrow: EscrowLifecycle<
            Arc<InMemoryAccountStore>,
            Arc<InMemoryJournalStore>,
            Arc<InMemoryBookingStore>,
        >,
        booking_id: BookingId,
        client: UserId,
        talent: UserId,
    }

    fn fixture(price: u64, client_balance: u64) -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = Arc::new(InMemoryJournalStore::new());
        let bookings = Arc::new(InMemoryBookingStore::new());
        let sink = RecordingSink::new();
        let escrow = EscrowLifecycle::new(
            accounts.clone(),
            journal.clone(),
            bookings.clone(),
            sink.clone() as Arc<dyn NotificationSink>,
        );

        let client = UserId::new();
        let talent = UserId::new();
        let booking_id = BookingId::new();
        accounts.credit(client, Pocket::Spendable, client_balance).unwrap();
        bookings
            .insert(Booking {
                id: booking_id,
                client_id: client,
                talent_id: talent,
                total_price: price,
                status: BookingStatus::PaymentPending,
                created_at: Utc::now(),
            })
            .unwrap();

        Fixture {
            accounts,
            journal,
            bookings,
            sink,
            escrow,
            booking_id,
            client,
            talent,
        }
    }

    fn account(f: &Fixture, user: UserId) -> (u64, u64) {
        f.accounts
            .get(user)
            .unwrap()
            .map(|a| (a.balance, a.escrow_balance))
            .unwrap_or((0, 0))
    }

    #[test]
    fn hold_moves_spendable_to_escrow_and_advances_booking() {
        let f = fixture(600, 1000);

        let receipt = f.escrow.hold(f.booking_id).unwrap();
        assert!(!receipt.replayed);
        assert_eq!(receipt.entry.signed_coins, -600);

        assert_eq!(account(&f, f.client), (400, 600));
        assert_eq!(
            f.bookings.get(f.booking_id).unwrap().unwrap().status,
            BookingStatus::Pending
        );

        // Second hold replays without moving funds again.
        let again = f.escrow.hold(f.booking_id).unwrap();
        assert!(again.replayed);
        assert_eq!(account(&f, f.client), (400, 600));
    }

    #[test]
    fn hold_with_insufficient_balance_fails_cleanly() {
        let f = fixture(600, 500);

        let err = f.escrow.hold(f.booking_id).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                needed: 600,
                available: 500
            }
        );
        assert_eq!(account(&f, f.client), (500, 0));
        assert_eq!(
            f.bookings.get(f.booking_id).unwrap().unwrap().status,
            BookingStatus::PaymentPending
        );
        assert!(f.journal.all().is_empty());
    }

    #[test]
    fn release_pays_the_talent_once() {
        let f = fixture(1000, 1000);
        f.escrow.hold(f.booking_id).unwrap();

        // Booking completes (collaborator's transition).
        f.bookings
            .transition(f.booking_id, BookingStatus::Pending, BookingStatus::Confirmed)
            .unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Confirmed, BookingStatus::Completed)
            .unwrap();

        let receipt = f.escrow.release(f.booking_id).unwrap();
        assert!(!receipt.replayed);
        assert_eq!(account(&f, f.client), (0, 0));
        assert_eq!(account(&f, f.talent), (1000, 0));
        assert!(
            receipt
                .entry
                .description
                .as_deref()
                .unwrap()
                .starts_with("Earnings from completed booking #")
        );

        // Double release: no balance change, no second entry.
        let entries_before = f.journal.all().len();
        let again = f.escrow.release(f.booking_id).unwrap();
        assert!(again.replayed);
        assert_eq!(account(&f, f.talent), (1000, 0));
        assert_eq!(f.journal.all().len(), entries_before);
    }

    #[test]
    fn release_requires_completed_booking() {
        let f = fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();

        let err = f.escrow.release(f.booking_id).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(account(&f, f.client), (400, 600));
    }

    #[test]
    fn refund_returns_escrow_to_client() {
        let f = fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Pending, BookingStatus::Cancelled)
            .unwrap();

        let receipt = f.escrow.refund(f.booking_id, "Booking cancelled").unwrap();
        assert!(!receipt.replayed);
        assert_eq!(receipt.entry.kind, EntryKind::Refund);
        assert_eq!(receipt.entry.description.as_deref(), Some("Booking cancelled"));
        assert_eq!(account(&f, f.client), (1000, 0));

        let again = f.escrow.refund(f.booking_id, "Booking cancelled").unwrap();
        assert!(again.replayed);
        assert_eq!(account(&f, f.client), (1000, 0));
    }

    #[test]
    fn escrow_shortfall_is_surfaced_not_clamped() {
        let f = fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Pending, BookingStatus::Cancelled)
            .unwrap();

        // Corrupt the books: drain the escrow pocket out-of-band.
        f.accounts
            .compare_and_set(f.client, Pocket::Escrow, 600, 100)
            .unwrap();

        let err = f.escrow.refund(f.booking_id, "Booking cancelled").unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientEscrow {
                needed: 600,
                held: 100
            }
        );
    }

    #[test]
    fn hold_on_non_payable_booking_moves_nothing() {
        let f = fixture(600, 1000);

        f.bookings
            .transition(
                f.booking_id,
                BookingStatus::PaymentPending,
                BookingStatus::Cancelled,
            )
            .unwrap();

        let err = f.escrow.hold(f.booking_id).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(account(&f, f.client), (1000, 0));
        assert!(f.journal.all().is_empty());
    }

    /// Journal whose next append can be made to fail.
    #[derive(Clone)]
    struct FlakyJournal {
        inner: Arc<InMemoryJournalStore>,
        fail_next_append: Arc<AtomicBool>,
    }

    impl FlakyJournal {
        fn new() -> Self {
            Self {
                inner: Arc::new(InMemoryJournalStore::new()),
                fail_next_append: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl JournalStore for FlakyJournal {
        fn append(&self, entry: NewJournalEntry) -> Result<JournalEntry, JournalError> {
            if self.fail_next_append.swap(false, Ordering::SeqCst) {
                return Err(JournalError::Backend("simulated outage".to_string()));
            }
            self.inner.append(entry)
        }

        fn find_completed_by_reference(
            &self,
            reference: &str,
        ) -> Result<Option<JournalEntry>, JournalError> {
            self.inner.find_completed_by_reference(reference)
        }

        fn find_completed_related(
            &self,
            user_id: UserId,
            kind: EntryKind,
            related: Uuid,
        ) -> Result<Option<JournalEntry>, JournalError> {
            self.inner.find_completed_related(user_id, kind, related)
        }

        fn history(
            &self,
            user_id: UserId,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<JournalEntry>, JournalError> {
            self.inner.history(user_id, limit, offset)
        }
    }

    struct FlakyFixture {
        accounts: Arc<InMemoryAccountStore>,
        journal: FlakyJournal,
        bookings: Arc<InMemoryBookingStore>,
        escrow: EscrowLifecycle<Arc<InMemoryAccountStore>, FlakyJournal, Arc<InMemoryBookingStore>>,
        booking_id: BookingId,
        client: UserId,
        talent: UserId,
    }

    fn flaky_fixture(price: u64, client_balance: u64) -> FlakyFixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = FlakyJournal::new();
        let bookings = Arc::new(InMemoryBookingStore::new());
        let escrow = EscrowLifecycle::new(
            accounts.clone(),
            journal.clone(),
            bookings.clone(),
            RecordingSink::new() as Arc<dyn NotificationSink>,
        );

        let client = UserId::new();
        let talent = UserId::new();
        let booking_id = BookingId::new();
        accounts
            .credit(client, Pocket::Spendable, client_balance)
            .unwrap();
        bookings
            .insert(Booking {
                id: booking_id,
                client_id: client,
                talent_id: talent,
                total_price: price,
                status: BookingStatus::PaymentPending,
                created_at: Utc::now(),
            })
            .unwrap();

        FlakyFixture {
            accounts,
            journal,
            bookings,
            escrow,
            booking_id,
            client,
            talent,
        }
    }

    fn pockets(accounts: &InMemoryAccountStore, user: UserId) -> (u64, u64) {
        accounts
            .get(user)
            .unwrap()
            .map(|a| (a.balance, a.escrow_balance))
            .unwrap_or((0, 0))
    }

    #[test]
    fn unjournaled_hold_is_unwound_and_retryable() {
        let f = flaky_fixture(600, 1000);
        f.journal.fail_next_append.store(true, Ordering::SeqCst);

        let err = f.escrow.hold(f.booking_id).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        // Funds and booking status both back where they started.
        assert_eq!(pockets(&f.accounts, f.client), (1000, 0));
        assert_eq!(
            f.bookings.get(f.booking_id).unwrap().unwrap().status,
            BookingStatus::PaymentPending
        );

        // A retry holds exactly once.
        let receipt = f.escrow.hold(f.booking_id).unwrap();
        assert!(!receipt.replayed);
        assert_eq!(pockets(&f.accounts, f.client), (400, 600));
        assert_eq!(f.journal.inner.all().len(), 1);
    }

    #[test]
    fn unjournaled_release_is_reversed_and_pays_once_on_retry() {
        let f = flaky_fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Pending, BookingStatus::Confirmed)
            .unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Confirmed, BookingStatus::Completed)
            .unwrap();

        f.journal.fail_next_append.store(true, Ordering::SeqCst);
        let err = f.escrow.release(f.booking_id).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        // Payout reversed: escrow intact, talent unpaid.
        assert_eq!(pockets(&f.accounts, f.client), (400, 600));
        assert_eq!(pockets(&f.accounts, f.talent), (0, 0));

        let receipt = f.escrow.release(f.booking_id).unwrap();
        assert!(!receipt.replayed);
        assert_eq!(pockets(&f.accounts, f.client), (400, 0));
        assert_eq!(pockets(&f.accounts, f.talent), (600, 0));
    }

    #[test]
    fn unjournaled_refund_is_reversed_and_refunds_once_on_retry() {
        let f = flaky_fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();
        f.bookings
            .transition(f.booking_id, BookingStatus::Pending, BookingStatus::Cancelled)
            .unwrap();

        f.journal.fail_next_append.store(true, Ordering::SeqCst);
        let err = f.escrow.refund(f.booking_id, "Booking cancelled").unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(pockets(&f.accounts, f.client), (400, 600));

        let receipt = f.escrow.refund(f.booking_id, "Booking cancelled").unwrap();
        assert!(!receipt.replayed);
        assert_eq!(pockets(&f.accounts, f.client), (1000, 0));
    }

    #[test]
    fn hold_notifies_talent_and_release_journal_is_completed() {
        let f = fixture(600, 1000);
        f.escrow.hold(f.booking_id).unwrap();

        let recorded = f.sink.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].user_id, f.talent);
        assert_eq!(recorded[0].kind, NotificationKind::BookingPaid);

        let entries = f.journal.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Completed);
    }
}
