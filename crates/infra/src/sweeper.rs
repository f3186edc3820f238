//! Booking expiration sweeper.
//!
//! Stateless periodic batch: select bookings stuck in a non-terminal status
//! past their max age, transition them to expired conditionally, and refund
//! any held escrow. Bookings are processed independently and sequentially;
//! one failure never aborts the rest.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use coinledger_core::BookingId;
use coinledger_wallet::{Booking, BookingStatus, EntryKind, short_id};

use crate::escrow::EscrowLifecycle;
use crate::idempotency::IdempotencyGuard;
use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{AccountStore, BookingStore, CasOutcome, JournalStore};

/// Max age per non-terminal status before a booking expires.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationRules {
    /// Unpaid bookings go quickly.
    pub payment_pending_max_age: Duration,
    /// Paid-but-unconfirmed bookings get a day.
    pub pending_max_age: Duration,
}

impl Default for ExpirationRules {
    fn default() -> Self {
        Self {
            payment_pending_max_age: Duration::hours(1),
            pending_max_age: Duration::hours(24),
        }
    }
}

impl ExpirationRules {
    fn rules(&self) -> [(BookingStatus, Duration); 2] {
        [
            (BookingStatus::PaymentPending, self.payment_pending_max_age),
            (BookingStatus::Pending, self.pending_max_age),
        ]
    }
}

/// One booking the sweep could not process.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub booking_id: Option<BookingId>,
    pub error: String,
}

/// What a sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Stale bookings selected.
    pub scanned: usize,
    /// Transitioned to expired.
    pub expired: usize,
    /// Held escrow refunded.
    pub refunded: usize,
    /// Moved on concurrently before our transition; left alone.
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

pub struct ExpirationSweeper<A, J, B> {
    bookings: B,
    guard: IdempotencyGuard<J>,
    escrow: EscrowLifecycle<A, J, B>,
    sink: Arc<dyn NotificationSink>,
    rules: ExpirationRules,
}

impl<A, J, B> ExpirationSweeper<A, J, B>
where
    A: AccountStore + Clone,
    J: JournalStore + Clone,
    B: BookingStore + Clone,
{
    pub fn new(
        accounts: A,
        journal: J,
        bookings: B,
        sink: Arc<dyn NotificationSink>,
        rules: ExpirationRules,
    ) -> Self {
        let guard = IdempotencyGuard::new(journal.clone());
        let escrow = EscrowLifecycle::new(accounts, journal, bookings.clone(), sink.clone());
        Self {
            bookings,
            guard,
            escrow,
            sink,
            rules,
        }
    }

    /// Run one sweep as of `now`. Never fails as a whole: per-booking errors
    /// land in the report, not in a `Result`.
    #[instrument(skip(self), fields(%now))]
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for (status, max_age) in self.rules.rules() {
            let cutoff = now - max_age;
            let stale = match self.bookings.stale_in_status(status, cutoff) {
                Ok(stale) => stale,
                Err(e) => {
                    warn!(status = status.as_str(), error = %e, "stale booking scan failed");
                    report.failures.push(SweepFailure {
                        booking_id: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            report.scanned += stale.len();
            for booking in stale {
                self.expire_one(&booking, status, &mut report);
            }
        }

        info!(
            scanned = report.scanned,
            expired = report.expired,
            refunded = report.refunded,
            skipped = report.skipped,
            failures = report.failures.len(),
            "sweep finished"
        );
        report
    }

    fn expire_one(&self, booking: &Booking, from: BookingStatus, report: &mut SweepReport) {
        match self
            .bookings
            .transition(booking.id, from, BookingStatus::Expired)
        {
            Ok(CasOutcome::Applied) => {}
            Ok(CasOutcome::Lost) => {
                // Moved on concurrently (paid, confirmed, cancelled, or a
                // parallel sweep); not ours to expire.
                report.skipped += 1;
                return;
            }
            Err(e) => {
                report.failures.push(SweepFailure {
                    booking_id: Some(booking.id),
                    error: e.to_string(),
                });
                return;
            }
        }
        report.expired += 1;

        match self.refund_if_held(booking) {
            Ok(true) => report.refunded += 1,
            Ok(false) => {}
            Err(e) => {
                report.failures.push(SweepFailure {
                    booking_id: Some(booking.id),
                    error: e,
                });
                return;
            }
        }

        self.sink.notify(Notification::new(
            booking.client_id,
            NotificationKind::BookingExpired,
            "Booking expired",
            format!("Booking #{} expired", short_id(booking.id.as_uuid())),
        ));
    }

    /// Refund the hold if one exists. Returns whether a refund was applied
    /// (a replay from an earlier sweep counts as no new refund).
    fn refund_if_held(&self, booking: &Booking) -> Result<bool, String> {
        let held = self
            .guard
            .completed_related(booking.client_id, EntryKind::Booking, Uuid::from(booking.id))
            .map_err(|e| e.to_string())?
            .is_some();
        if !held {
            return Ok(false);
        }

        let receipt = self
            .escrow
            .refund(
                booking.id,
                &format!(
                    "Refund for expired booking #{}",
                    short_id(booking.id.as_uuid())
                ),
            )
            .map_err(|e| e.to_string())?;
        Ok(!receipt.replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use coinledger_core::UserId;
    use coinledger_wallet::Pocket;

    use crate::escrow::EscrowLifecycle;
    use crate::notify::{NotificationSink, NullSink, RecordingSink};
    use crate::store::{
        BookingStoreError, InMemoryAccountStore, InMemoryBookingStore, InMemoryJournalStore,
    };

    struct Fixture {
        accounts: Arc<InMemoryAccountStore>,
        journal: Arc<InMemoryJournalStore>,
        bookings: Arc<InMemoryBookingStore>,
        sweeper: ExpirationSweeper<
            Arc<InMemoryAccountStore>,
            Arc<InMemoryJournalStore>,
            Arc<InMemoryBookingStore>,
        >,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = Arc::new(InMemoryJournalStore::new());
        let bookings = Arc::new(InMemoryBookingStore::new());
        let sweeper = ExpirationSweeper::new(
            accounts.clone(),
            journal.clone(),
            bookings.clone(),
            Arc::new(NullSink) as Arc<dyn NotificationSink>,
            ExpirationRules::default(),
        );
        Fixture {
            accounts,
            journal,
            bookings,
            sweeper,
        }
    }

    fn seed_booking(f: &Fixture, status: BookingStatus, age: Duration, price: u64) -> Booking {
        let booking = Booking {
            id: BookingId::new(),
            client_id: UserId::new(),
            talent_id: UserId::new(),
            total_price: price,
            status,
            created_at: Utc::now() - age,
        };
        f.bookings.insert(booking.clone()).unwrap();
        booking
    }

    #[test]
    fn expires_stale_unpaid_bookings_without_refund() {
        let f = fixture();
        let stale = seed_booking(&f, BookingStatus::PaymentPending, Duration::hours(2), 600);
        seed_booking(&f, BookingStatus::PaymentPending, Duration::minutes(10), 600);

        let report = f.sweeper.sweep(Utc::now());
        assert_eq!(report.scanned, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(report.refunded, 0);
        assert!(report.failures.is_empty());

        assert_eq!(
            f.bookings.get(stale.id).unwrap().unwrap().status,
            BookingStatus::Expired
        );
    }

    #[test]
    fn expired_held_booking_is_refunded() {
        let f = fixture();
        let booking = seed_booking(&f, BookingStatus::PaymentPending, Duration::zero(), 600);
        f.accounts
            .credit(booking.client_id, Pocket::Spendable, 1000)
            .unwrap();

        // Pay, then age the booking past the pending limit by sweeping in
        // the future.
        let escrow = EscrowLifecycle::new(
            f.accounts.clone(),
            f.journal.clone(),
            f.bookings.clone(),
            Arc::new(NullSink) as Arc<dyn NotificationSink>,
        );
        escrow.hold(booking.id).unwrap();

        let report = f.sweeper.sweep(Utc::now() + Duration::hours(25));
        assert_eq!(report.expired, 1);
        assert_eq!(report.refunded, 1);

        let account = f.accounts.get(booking.client_id).unwrap().unwrap();
        assert_eq!(account.balance, 1000);
        assert_eq!(account.escrow_balance, 0);

        let refund_desc = format!(
            "Refund for expired booking #{}",
            short_id(booking.id.as_uuid())
        );
        assert!(
            f.journal
                .all()
                .iter()
                .any(|e| e.description.as_deref() == Some(refund_desc.as_str()))
        );
    }

    #[test]
    fn double_sweep_refunds_nothing_twice() {
        let f = fixture();
        let booking = seed_booking(&f, BookingStatus::PaymentPending, Duration::zero(), 600);
        f.accounts
            .credit(booking.client_id, Pocket::Spendable, 600)
            .unwrap();
        let escrow = EscrowLifecycle::new(
            f.accounts.clone(),
            f.journal.clone(),
            f.bookings.clone(),
            Arc::new(NullSink) as Arc<dyn NotificationSink>,
        );
        escrow.hold(booking.id).unwrap();

        let later = Utc::now() + Duration::hours(25);
        let first = f.sweeper.sweep(later);
        let second = f.sweeper.sweep(later);

        assert_eq!(first.refunded, 1);
        assert_eq!(second.scanned, 0);
        assert_eq!(second.refunded, 0);

        let account = f.accounts.get(booking.client_id).unwrap().unwrap();
        assert_eq!(account.balance, 600);
        assert_eq!(account.escrow_balance, 0);
    }

    /// Booking store whose listed bookings advance right after selection,
    /// emulating a concurrent writer between the scan and the transition.
    struct AdvancingBookingStore {
        inner: Arc<InMemoryBookingStore>,
    }

    impl BookingStore for AdvancingBookingStore {
        fn insert(&self, booking: Booking) -> Result<(), BookingStoreError> {
            self.inner.insert(booking)
        }

        fn get(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError> {
            self.inner.get(id)
        }

        fn transition(
            &self,
            id: BookingId,
            from: BookingStatus,
            to: BookingStatus,
        ) -> Result<CasOutcome, BookingStoreError> {
            self.inner.transition(id, from, to)
        }

        fn stale_in_status(
            &self,
            status: BookingStatus,
            created_before: DateTime<Utc>,
        ) -> Result<Vec<Booking>, BookingStoreError> {
            let stale = self.inner.stale_in_status(status, created_before)?;
            for booking in &stale {
                self.inner
                    .transition(booking.id, booking.status, BookingStatus::Confirmed)?;
            }
            Ok(stale)
        }
    }

    #[test]
    fn concurrently_advanced_bookings_are_skipped() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = Arc::new(InMemoryJournalStore::new());
        let bookings = Arc::new(AdvancingBookingStore {
            inner: Arc::new(InMemoryBookingStore::new()),
        });
        let sweeper = ExpirationSweeper::new(
            accounts,
            journal,
            bookings.clone(),
            Arc::new(NullSink) as Arc<dyn NotificationSink>,
            ExpirationRules::default(),
        );

        let booking = Booking {
            id: BookingId::new(),
            client_id: UserId::new(),
            talent_id: UserId::new(),
            total_price: 600,
            status: BookingStatus::Pending,
            created_at: Utc::now() - Duration::hours(30),
        };
        bookings.insert(booking.clone()).unwrap();

        let report = sweeper.sweep(Utc::now());
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.expired, 0);
        assert!(report.failures.is_empty());
        assert_eq!(
            bookings.get(booking.id).unwrap().unwrap().status,
            BookingStatus::Confirmed
        );
    }

    #[test]
    fn sweep_notifies_the_client() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = Arc::new(InMemoryJournalStore::new());
        let bookings = Arc::new(InMemoryBookingStore::new());
        let sink = RecordingSink::new();
        let sweeper = ExpirationSweeper::new(
            accounts,
            journal,
            bookings.clone(),
            sink.clone() as Arc<dyn NotificationSink>,
            ExpirationRules::default(),
        );

        let booking = Booking {
            id: BookingId::new(),
            client_id: UserId::new(),
            talent_id: UserId::new(),
            total_price: 600,
            status: BookingStatus::PaymentPending,
            created_at: Utc::now() - Duration::hours(2),
        };
        bookings.insert(booking.clone()).unwrap();

        sweeper.sweep(Utc::now());

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].user_id, booking.client_id);
        assert_eq!(recorded[0].kind, NotificationKind::BookingExpired);
    }

    #[test]
    fn custom_rules_are_respected() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let journal = Arc::new(InMemoryJournalStore::new());
        let bookings = Arc::new(InMemoryBookingStore::new());
        let sweeper = ExpirationSweeper::new(
            accounts,
            journal,
            bookings.clone(),
            Arc::new(NullSink) as Arc<dyn NotificationSink>,
            ExpirationRules {
                payment_pending_max_age: Duration::minutes(5),
                pending_max_age: Duration::hours(1),
            },
        );

        let booking = Booking {
            id: BookingId::new(),
            client_id: UserId::new(),
            talent_id: UserId::new(),
            total_price: 600,
            status: BookingStatus::PaymentPending,
            created_at: Utc::now() - Duration::minutes(10),
        };
        bookings.insert(booking.clone()).unwrap();

        let report = sweeper.sweep(Utc::now());
        assert_eq!(report.expired, 1);
    }
}
