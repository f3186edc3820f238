//! Fire-and-forget notifications.
//!
//! Engines call the sink after a successful balance-affecting operation.
//! Delivery is best-effort: a sink failure is logged and never rolls back a
//! ledger operation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use coinledger_core::UserId;
use coinledger_events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PurchaseCredited,
    GiftReceived,
    MediaUnlocked,
    BookingPaid,
    EarningsReleased,
    BookingRefunded,
    BookingExpired,
    WithdrawalApproved,
    WithdrawalRejected,
}

/// A user-facing message about a ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Notification delivery seam.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards everything. Dev/test default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Publishes notifications on an event bus for downstream fan-out (SSE,
/// push, ...).
pub struct BusSink<B> {
    bus: B,
}

impl<B> BusSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> NotificationSink for BusSink<B>
where
    B: EventBus<Notification>,
{
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.bus.publish(notification) {
            warn!(error = ?e, "notification publish failed, dropping");
        }
    }
}

/// Records notifications for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded(&self) -> Vec<Notification> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(notification);
        }
    }
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_events::InMemoryEventBus;

    #[test]
    fn bus_sink_fans_out_to_subscribers() {
        let bus = Arc::new(InMemoryEventBus::<Notification>::new());
        let subscription = bus.subscribe();
        let sink = BusSink::new(bus);

        let user = UserId::new();
        sink.notify(Notification::new(
            user,
            NotificationKind::GiftReceived,
            "Gift received",
            "You received 500 coins",
        ));

        let received = subscription.try_recv().unwrap();
        assert_eq!(received.user_id, user);
        assert_eq!(received.kind, NotificationKind::GiftReceived);
    }

    #[test]
    fn recording_sink_captures_in_order() {
        let sink = RecordingSink::new();
        let user = UserId::new();

        sink.notify(Notification::new(
            user,
            NotificationKind::PurchaseCredited,
            "a",
            "b",
        ));
        sink.notify(Notification::new(
            user,
            NotificationKind::BookingExpired,
            "c",
            "d",
        ));

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].kind, NotificationKind::PurchaseCredited);
        assert_eq!(recorded[1].kind, NotificationKind::BookingExpired);
    }
}
