//! Store and engine wiring behind the HTTP handlers.
//!
//! `AppServices` carries one fully-wired engine set per storage backend:
//! in-memory for dev/tests, Postgres when `USE_PERSISTENT_STORES` is set.
//! Every method is synchronous; handlers call them inside `spawn_blocking`
//! because the Postgres stores bridge onto the runtime with `block_on`.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use coinledger_core::{BookingId, LedgerResult, MediaId, UserId, WithdrawalId};
use coinledger_infra::{
    AccountStore, EscrowLifecycle, EscrowReceipt, ExpirationRules, ExpirationSweeper,
    InMemoryAccountStore, InMemoryBookingStore, InMemoryJournalStore, InMemoryWithdrawalStore,
    JournalStore, Notification, NotificationSink, PostgresAccountStore, PostgresBookingStore,
    PostgresJournalStore, PostgresWithdrawalStore, SweepReport, TransferEngine, TransferReceipt,
    TransferRequest, WithdrawalWorkflow,
};
use coinledger_wallet::{
    Account, EntryKind, JournalEntry, WithdrawalRequest, WithdrawalStatus, package_for_purchase,
    validate_gift,
};

/// Fans engine notifications out to SSE subscribers. Lossy: with no
/// subscriber, or a lagging one, messages drop rather than backpressure the
/// ledger path.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

/// One engine set over a concrete store family.
pub struct Engines<A, J, B, W> {
    accounts: A,
    journal: J,
    transfers: TransferEngine<A, J>,
    escrow: EscrowLifecycle<A, J, B>,
    withdrawals: WithdrawalWorkflow<A, J, W>,
    sweeper: ExpirationSweeper<A, J, B>,
}

impl<A, J, B, W> Engines<A, J, B, W>
where
    A: AccountStore + Clone,
    J: JournalStore + Clone,
    B: coinledger_infra::BookingStore + Clone,
    W: coinledger_infra::WithdrawalStore,
{
    fn new(
        accounts: A,
        journal: J,
        bookings: B,
        withdrawals: W,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            transfers: TransferEngine::new(accounts.clone(), journal.clone(), sink.clone()),
            escrow: EscrowLifecycle::new(
                accounts.clone(),
                journal.clone(),
                bookings.clone(),
                sink.clone(),
            ),
            withdrawals: WithdrawalWorkflow::new(
                accounts.clone(),
                journal.clone(),
                withdrawals,
                sink.clone(),
            ),
            sweeper: ExpirationSweeper::new(
                accounts.clone(),
                journal.clone(),
                bookings,
                sink,
                ExpirationRules::default(),
            ),
            accounts,
            journal,
        }
    }
}

type InMemoryEngines = Engines<
    Arc<InMemoryAccountStore>,
    Arc<InMemoryJournalStore>,
    Arc<InMemoryBookingStore>,
    Arc<InMemoryWithdrawalStore>,
>;

type PostgresEngines = Engines<
    Arc<PostgresAccountStore>,
    Arc<PostgresJournalStore>,
    Arc<PostgresBookingStore>,
    Arc<PostgresWithdrawalStore>,
>;

pub enum AppServices {
    InMemory {
        engines: InMemoryEngines,
        realtime_tx: broadcast::Sender<Notification>,
    },
    Persistent {
        engines: PostgresEngines,
        realtime_tx: broadcast::Sender<Notification>,
    },
}

macro_rules! with_engines {
    ($self:expr, $engines:ident => $body:expr) => {
        match $self {
            AppServices::InMemory {
                engines: $engines, ..
            } => $body,
            AppServices::Persistent {
                engines: $engines, ..
            } => $body,
        }
    };
}

impl AppServices {
    pub fn wallet(&self, user: UserId) -> LedgerResult<Account> {
        with_engines!(self, e => Ok(e.accounts.get_or_create(user)?))
    }

    pub fn history(&self, user: UserId, limit: u32, offset: u32) -> LedgerResult<Vec<JournalEntry>> {
        with_engines!(self, e => Ok(e.journal.history(user, limit, offset)?))
    }

    /// Webhook credit. Only amounts matching a catalog package are accepted.
    pub fn credit_purchase(
        &self,
        user: UserId,
        coins: u64,
        reference: &str,
    ) -> LedgerResult<TransferReceipt> {
        let package = package_for_purchase(coins)?;
        with_engines!(self, e => e.transfers.credit(
            user,
            coins,
            EntryKind::Purchase,
            reference,
            Some(format!("Purchased the {} package", package.id)),
        ))
    }

    pub fn gift(
        &self,
        from: UserId,
        to: UserId,
        coins: u64,
        message: Option<String>,
    ) -> LedgerResult<TransferReceipt> {
        validate_gift(from, to, coins, message.as_deref())?;
        let mut request = TransferRequest::new(from, to, coins, EntryKind::Gift);
        if let Some(message) = message {
            request = request.with_description(message);
        }
        with_engines!(self, e => e.transfers.transfer(request))
    }

    /// Premium media unlock; idempotent per (user, media).
    pub fn unlock(
        &self,
        user: UserId,
        talent: UserId,
        media: MediaId,
        price: u64,
    ) -> LedgerResult<TransferReceipt> {
        let request =
            TransferRequest::new(user, talent, price, EntryKind::PremiumUnlock).with_related(media);
        with_engines!(self, e => e.transfers.transfer(request))
    }

    pub fn booking_pay(&self, booking: BookingId) -> LedgerResult<EscrowReceipt> {
        with_engines!(self, e => e.escrow.hold(booking))
    }

    pub fn booking_release(&self, booking: BookingId) -> LedgerResult<EscrowReceipt> {
        with_engines!(self, e => e.escrow.release(booking))
    }

    pub fn booking_refund(&self, booking: BookingId, reason: &str) -> LedgerResult<EscrowReceipt> {
        with_engines!(self, e => e.escrow.refund(booking, reason))
    }

    pub fn withdrawal_request(
        &self,
        talent: UserId,
        coins: u64,
    ) -> LedgerResult<WithdrawalRequest> {
        with_engines!(self, e => e.withdrawals.request(talent, coins))
    }

    pub fn withdrawal_approve(
        &self,
        id: WithdrawalId,
        notes: Option<String>,
    ) -> LedgerResult<WithdrawalRequest> {
        with_engines!(self, e => e.withdrawals.approve(id, notes))
    }

    pub fn withdrawal_reject(
        &self,
        id: WithdrawalId,
        reason: &str,
    ) -> LedgerResult<WithdrawalRequest> {
        with_engines!(self, e => e.withdrawals.reject(id, reason))
    }

    pub fn withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> LedgerResult<Vec<WithdrawalRequest>> {
        with_engines!(self, e => e.withdrawals.list_by_status(status))
    }

    pub fn withdrawals_by_talent(&self, talent: UserId) -> LedgerResult<Vec<WithdrawalRequest>> {
        with_engines!(self, e => e.withdrawals.list_by_talent(talent))
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        with_engines!(self, e => e.sweeper.sweep(now))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        match self {
            AppServices::InMemory { realtime_tx, .. }
            | AppServices::Persistent { realtime_tx, .. } => realtime_tx.subscribe(),
        }
    }
}

/// Wire stores and engines from the environment.
pub async fn build_services() -> AppServices {
    let (realtime_tx, _) = broadcast::channel(256);
    let sink: Arc<dyn NotificationSink> = Arc::new(BroadcastSink {
        tx: realtime_tx.clone(),
    });

    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if use_persistent {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES is enabled");
        let pool = PgPool::connect(&url)
            .await
            .expect("failed to connect to Postgres");
        tracing::info!("using Postgres stores");
        AppServices::Persistent {
            engines: Engines::new(
                Arc::new(PostgresAccountStore::new(pool.clone())),
                Arc::new(PostgresJournalStore::new(pool.clone())),
                Arc::new(PostgresBookingStore::new(pool.clone())),
                Arc::new(PostgresWithdrawalStore::new(pool)),
                sink,
            ),
            realtime_tx,
        }
    } else {
        tracing::info!("using in-memory stores");
        AppServices::InMemory {
            engines: Engines::new(
                Arc::new(InMemoryAccountStore::new()),
                Arc::new(InMemoryJournalStore::new()),
                Arc::new(InMemoryBookingStore::new()),
                Arc::new(InMemoryWithdrawalStore::new()),
                sink,
            ),
            realtime_tx,
        }
    }
}

/// SSE stream of one user's notifications.
pub fn user_sse_stream(
    services: Arc<AppServices>,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(n) if n.user_id == user_id => {
            let data = serde_json::to_string(&n).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event("notification").data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
