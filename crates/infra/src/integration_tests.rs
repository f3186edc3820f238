//! Cross-component flows against the in-memory stores.

use std::sync::Arc;

use chrono::{Duration, Utc};

use coinledger_core::{BookingId, LedgerError, UserId};
use coinledger_wallet::{Booking, BookingStatus, EntryKind, Pocket, WithdrawalStatus, validate_gift};

use crate::escrow::EscrowLifecycle;
use crate::notify::{NotificationKind, NotificationSink, RecordingSink};
use crate::store::{
    AccountStore, BookingStore, InMemoryAccountStore, InMemoryBookingStore, InMemoryJournalStore,
    InMemoryWithdrawalStore, JournalStore, WithdrawalStore,
};
use crate::sweeper::{ExpirationRules, ExpirationSweeper};
use crate::transfer::{TransferEngine, TransferRequest};
use crate::withdrawal::WithdrawalWorkflow;

struct World {
    accounts: Arc<InMemoryAccountStore>,
    journal: Arc<InMemoryJournalStore>,
    bookings: Arc<InMemoryBookingStore>,
    withdrawals: Arc<InMemoryWithdrawalStore>,
    sink: Arc<RecordingSink>,
    transfers: TransferEngine<Arc<InMemoryAccountStore>, Arc<InMemoryJournalStore>>,
    escrow: EscrowLifecycle<
        Arc<InMemoryAccountStore>,
        Arc<InMemoryJournalStore>,
        Arc<InMemoryBookingStore>,
    >,
    withdrawal_workflow: WithdrawalWorkflow<
        Arc<InMemoryAccountStore>,
        Arc<InMemoryJournalStore>,
        Arc<InMemoryWithdrawalStore>,
    >,
    sweeper: ExpirationSweeper<
        Arc<InMemoryAccountStore>,
        Arc<InMemoryJournalStore>,
        Arc<InMemoryBookingStore>,
    >,
}

fn world() -> World {
    let accounts = Arc::new(InMemoryAccountStore::new());
    let journal = Arc::new(InMemoryJournalStore::new());
    let bookings = Arc::new(InMemoryBookingStore::new());
    let withdrawals = Arc::new(InMemoryWithdrawalStore::new());
    let sink = RecordingSink::new();
    let dyn_sink: Arc<dyn NotificationSink> = sink.clone();

    World {
        transfers: TransferEngine::new(accounts.clone(), journal.clone(), dyn_sink.clone()),
        escrow: EscrowLifecycle::new(
            accounts.clone(),
            journal.clone(),
            bookings.clone(),
            dyn_sink.clone(),
        ),
        withdrawal_workflow: WithdrawalWorkflow::new(
            accounts.clone(),
            journal.clone(),
            withdrawals.clone(),
            dyn_sink.clone(),
        ),
        sweeper: ExpirationSweeper::new(
            accounts.clone(),
            journal.clone(),
            bookings.clone(),
            dyn_sink,
            ExpirationRules::default(),
        ),
        accounts,
        journal,
        bookings,
        withdrawals,
        sink,
    }
}

fn pockets(w: &World, user: UserId) -> (u64, u64) {
    w.accounts
        .get(user)
        .unwrap()
        .map(|a| (a.balance, a.escrow_balance))
        .unwrap_or((0, 0))
}

fn seed_booking(w: &World, client: UserId, talent: UserId, price: u64) -> BookingId {
    let id = BookingId::new();
    w.bookings
        .insert(Booking {
            id,
            client_id: client,
            talent_id: talent,
            total_price: price,
            status: BookingStatus::PaymentPending,
            created_at: Utc::now(),
        })
        .unwrap();
    id
}

#[test]
fn purchase_gift_booking_release_full_flow() {
    let w = world();
    let client = UserId::new();
    let talent = UserId::new();

    // Payment webhook credits a purchased package.
    let credit = w
        .transfers
        .credit(client, 2_500, EntryKind::Purchase, "pay_flow_1", None)
        .unwrap();
    assert!(!credit.replayed);
    assert_eq!(pockets(&w, client), (2_500, 0));

    // Client sends a gift.
    validate_gift(client, talent, 500, Some("thanks!")).unwrap();
    w.transfers
        .transfer(
            TransferRequest::new(client, talent, 500, EntryKind::Gift).with_description("thanks!"),
        )
        .unwrap();
    assert_eq!(pockets(&w, client), (2_000, 0));
    assert_eq!(pockets(&w, talent), (500, 0));

    // Client books a 600-coin service; payment holds escrow.
    let booking_id = seed_booking(&w, client, talent, 600);
    w.escrow.hold(booking_id).unwrap();
    assert_eq!(pockets(&w, client), (1_400, 600));
    assert_eq!(
        w.bookings.get(booking_id).unwrap().unwrap().status,
        BookingStatus::Pending
    );

    // Service happens; booking completes; escrow releases.
    w.bookings
        .transition(booking_id, BookingStatus::Pending, BookingStatus::Confirmed)
        .unwrap();
    w.bookings
        .transition(booking_id, BookingStatus::Confirmed, BookingStatus::Completed)
        .unwrap();
    w.escrow.release(booking_id).unwrap();

    assert_eq!(pockets(&w, client), (1_400, 0));
    assert_eq!(pockets(&w, talent), (1_100, 0));

    // Talent withdraws their earnings.
    let request = w.withdrawal_workflow.request(talent, 1_000).unwrap();
    let approved = w.withdrawal_workflow.approve(request.id, None).unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(pockets(&w, talent), (100, 0));

    // Journal: purchase credit, gift debit+credit, hold, release, withdrawal.
    assert_eq!(w.journal.all().len(), 6);

    let kinds: Vec<_> = w.sink.recorded().iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::PurchaseCredited));
    assert!(kinds.contains(&NotificationKind::GiftReceived));
    assert!(kinds.contains(&NotificationKind::BookingPaid));
    assert!(kinds.contains(&NotificationKind::EarningsReleased));
    assert!(kinds.contains(&NotificationKind::WithdrawalApproved));
}

#[test]
fn webhook_retries_credit_once() {
    let w = world();
    let client = UserId::new();

    for _ in 0..3 {
        w.transfers
            .credit(client, 1_000, EntryKind::Purchase, "pay_retry", None)
            .unwrap();
    }

    assert_eq!(pockets(&w, client), (1_000, 0));
    assert_eq!(w.journal.all().len(), 1);
    assert_eq!(
        w.journal
            .find_completed_by_reference("pay_retry")
            .unwrap()
            .unwrap()
            .signed_coins,
        1_000
    );
}

#[test]
fn hold_then_sweep_refunds_and_is_idempotent() {
    let w = world();
    let client = UserId::new();
    let talent = UserId::new();

    w.transfers
        .credit(client, 1_000, EntryKind::Purchase, "pay_sweep", None)
        .unwrap();
    let booking_id = seed_booking(&w, client, talent, 600);
    w.escrow.hold(booking_id).unwrap();
    assert_eq!(pockets(&w, client), (400, 600));

    // The booking is never confirmed; a day later the sweeper reclaims it.
    let later = Utc::now() + Duration::hours(25);
    let first = w.sweeper.sweep(later);
    assert_eq!(first.expired, 1);
    assert_eq!(first.refunded, 1);
    assert_eq!(pockets(&w, client), (1_000, 0));

    let second = w.sweeper.sweep(later);
    assert_eq!(second.expired, 0);
    assert_eq!(second.refunded, 0);
    assert_eq!(pockets(&w, client), (1_000, 0));

    // Release after expiry must not pay the talent.
    let err = w.escrow.release(booking_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert_eq!(pockets(&w, talent), (0, 0));
}

#[test]
fn concurrent_gifts_conserve_coins() {
    let w = world();
    let transfers = Arc::new(TransferEngine::new(
        w.accounts.clone(),
        w.journal.clone(),
        w.sink.clone() as Arc<dyn NotificationSink>,
    ));

    let sender = UserId::new();
    let receivers: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
    w.accounts.credit(sender, Pocket::Spendable, 10_000).unwrap();

    let handles: Vec<_> = receivers
        .iter()
        .flat_map(|&to| std::iter::repeat_n(to, 5))
        .map(|to| {
            let transfers = transfers.clone();
            std::thread::spawn(move || {
                transfers.transfer(TransferRequest::new(sender, to, 100, EntryKind::Gift))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // 20 gifts of 100 coins each.
    assert_eq!(pockets(&w, sender), (8_000, 0));
    let received: u64 = receivers.iter().map(|&r| pockets(&w, r).0).sum();
    assert_eq!(received, 2_000);
}

#[test]
fn rejected_withdrawal_keeps_funds_spendable() {
    let w = world();
    let talent = UserId::new();
    w.transfers
        .credit(talent, 5_000, EntryKind::Purchase, "pay_wd", None)
        .unwrap();

    let request = w.withdrawal_workflow.request(talent, 3_000).unwrap();
    w.withdrawal_workflow
        .reject(request.id, "payout details missing")
        .unwrap();

    assert_eq!(pockets(&w, talent), (5_000, 0));
    let listed = w
        .withdrawal_workflow
        .list_by_status(WithdrawalStatus::Rejected)
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].admin_notes.as_deref(), Some("payout details missing"));
    assert!(
        w.withdrawals
            .get(request.id)
            .unwrap()
            .unwrap()
            .processed_at
            .is_some()
    );
}
