//! Booking storage (collaborator contract).
//!
//! The ledger consumes bookings read-mostly; the only writes it performs are
//! conditional status transitions (hold: payment_pending→pending, sweeper:
//! source status→expired).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use coinledger_core::{BookingId, LedgerError, UserId};
use coinledger_wallet::{Booking, BookingStatus};

use super::{CasOutcome, describe_sqlx_error, runtime_handle};

#[derive(Debug, Error)]
pub enum BookingStoreError {
    #[error("booking not found: {0}")]
    NotFound(BookingId),

    #[error("booking storage failure: {0}")]
    Backend(String),
}

impl From<BookingStoreError> for LedgerError {
    fn from(err: BookingStoreError) -> Self {
        match err {
            BookingStoreError::NotFound(id) => LedgerError::not_found("booking", id),
            BookingStoreError::Backend(msg) => LedgerError::storage(msg),
        }
    }
}

pub trait BookingStore: Send + Sync {
    fn insert(&self, booking: Booking) -> Result<(), BookingStoreError>;

    fn get(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError>;

    /// `from` → `to` only if the status is still `from`. `Lost` means the
    /// booking moved on concurrently.
    fn transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, BookingStoreError>;

    /// Bookings still in `status` created strictly before `created_before`.
    fn stale_in_status(
        &self,
        status: BookingStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingStoreError>;
}

impl<S> BookingStore for Arc<S>
where
    S: BookingStore + ?Sized,
{
    fn insert(&self, booking: Booking) -> Result<(), BookingStoreError> {
        (**self).insert(booking)
    }

    fn get(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError> {
        (**self).get(id)
    }

    fn transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, BookingStoreError> {
        (**self).transition(id, from, to)
    }

    fn stale_in_status(
        &self,
        status: BookingStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingStoreError> {
        (**self).stale_in_status(status, created_before)
    }
}

/// In-memory booking store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingStore for InMemoryBookingStore {
    fn insert(&self, booking: Booking) -> Result<(), BookingStoreError> {
        let mut bookings = self
            .bookings
            .write()
            .map_err(|_| BookingStoreError::Backend("lock poisoned".to_string()))?;
        bookings.insert(booking.id, booking);
        Ok(())
    }

    fn get(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| BookingStoreError::Backend("lock poisoned".to_string()))?;
        Ok(bookings.get(&id).cloned())
    }

    fn transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, BookingStoreError> {
        let mut bookings = self
            .bookings
            .write()
            .map_err(|_| BookingStoreError::Backend("lock poisoned".to_string()))?;

        let booking = bookings.get_mut(&id).ok_or(BookingStoreError::NotFound(id))?;

        if booking.status != from {
            return Ok(CasOutcome::Lost);
        }

        booking.status = to;
        Ok(CasOutcome::Applied)
    }

    fn stale_in_status(
        &self,
        status: BookingStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingStoreError> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| BookingStoreError::Backend("lock poisoned".to_string()))?;

        let mut stale: Vec<_> = bookings
            .values()
            .filter(|b| b.status == status && b.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        Ok(stale)
    }
}

/// Postgres-backed booking store.
#[derive(Debug, Clone)]
pub struct PostgresBookingStore {
    pool: Arc<PgPool>,
}

impl PostgresBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, booking),
        fields(id = %booking.id, status = booking.status.as_str()),
        err
    )]
    pub async fn insert_booking(&self, booking: Booking) -> Result<(), BookingStoreError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, client_id, talent_id, total_price, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.client_id.as_uuid())
        .bind(booking.talent_id.as_uuid())
        .bind(booking.total_price as i64)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| BookingStoreError::Backend(describe_sqlx_error("insert", &e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(id = %id), err)]
    pub async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, talent_id, total_price, status, created_at
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| BookingStoreError::Backend(describe_sqlx_error("get", &e)))?;

        row.as_ref().map(booking_from_row).transpose()
    }

    #[instrument(
        skip(self),
        fields(id = %id, from = from.as_str(), to = to.as_str()),
        err
    )]
    pub async fn transition_booking(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, BookingStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| BookingStoreError::Backend(describe_sqlx_error("transition", &e)))?;

        if result.rows_affected() == 0 {
            let exists = self.get_booking(id).await?.is_some();
            if !exists {
                return Err(BookingStoreError::NotFound(id));
            }
            return Ok(CasOutcome::Lost);
        }

        Ok(CasOutcome::Applied)
    }

    #[instrument(skip(self), fields(status = status.as_str(), %created_before), err)]
    pub async fn stale_bookings(
        &self,
        status: BookingStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, client_id, talent_id, total_price, status, created_at
            FROM bookings
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.as_str())
        .bind(created_before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| BookingStoreError::Backend(describe_sqlx_error("stale_in_status", &e)))?;

        rows.iter().map(booking_from_row).collect()
    }
}

fn booking_from_row(row: &sqlx::postgres::PgRow) -> Result<Booking, BookingStoreError> {
    let read = |what: &str, e: sqlx::Error| {
        BookingStoreError::Backend(format!("failed to read {what}: {e}"))
    };

    let id: Uuid = row.try_get("id").map_err(|e| read("id", e))?;
    let client_id: Uuid = row.try_get("client_id").map_err(|e| read("client_id", e))?;
    let talent_id: Uuid = row.try_get("talent_id").map_err(|e| read("talent_id", e))?;
    let total_price: i64 = row
        .try_get("total_price")
        .map_err(|e| read("total_price", e))?;
    let status: String = row.try_get("status").map_err(|e| read("status", e))?;
    let created_at = row
        .try_get("created_at")
        .map_err(|e| read("created_at", e))?;

    Ok(Booking {
        id: BookingId::from_uuid(id),
        client_id: UserId::from_uuid(client_id),
        talent_id: UserId::from_uuid(talent_id),
        total_price: total_price as u64,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| BookingStoreError::Backend(format!("unknown booking status: {status}")))?,
        created_at,
    })
}

impl BookingStore for PostgresBookingStore {
    fn insert(&self, booking: Booking) -> Result<(), BookingStoreError> {
        let handle = runtime_handle("PostgresBookingStore").map_err(BookingStoreError::Backend)?;
        handle.block_on(self.insert_booking(booking))
    }

    fn get(&self, id: BookingId) -> Result<Option<Booking>, BookingStoreError> {
        let handle = runtime_handle("PostgresBookingStore").map_err(BookingStoreError::Backend)?;
        handle.block_on(self.get_booking(id))
    }

    fn transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, BookingStoreError> {
        let handle = runtime_handle("PostgresBookingStore").map_err(BookingStoreError::Backend)?;
        handle.block_on(self.transition_booking(id, from, to))
    }

    fn stale_in_status(
        &self,
        status: BookingStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingStoreError> {
        let handle = runtime_handle("PostgresBookingStore").map_err(BookingStoreError::Backend)?;
        handle.block_on(self.stale_bookings(status, created_before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(status: BookingStatus, age: Duration) -> Booking {
        Booking {
            id: BookingId::new(),
            client_id: UserId::new(),
            talent_id: UserId::new(),
            total_price: 600,
            status,
            created_at: Utc::now() - age,
        }
    }

    #[test]
    fn transition_requires_expected_source_status() {
        let store = InMemoryBookingStore::new();
        let b = booking(BookingStatus::PaymentPending, Duration::zero());
        let id = b.id;
        store.insert(b).unwrap();

        let applied = store
            .transition(id, BookingStatus::PaymentPending, BookingStatus::Pending)
            .unwrap();
        assert_eq!(applied, CasOutcome::Applied);

        // Source status no longer matches.
        let lost = store
            .transition(id, BookingStatus::PaymentPending, BookingStatus::Expired)
            .unwrap();
        assert_eq!(lost, CasOutcome::Lost);
        assert_eq!(store.get(id).unwrap().unwrap().status, BookingStatus::Pending);
    }

    #[test]
    fn stale_selection_respects_status_and_cutoff() {
        let store = InMemoryBookingStore::new();
        let old_pending = booking(BookingStatus::Pending, Duration::hours(30));
        let fresh_pending = booking(BookingStatus::Pending, Duration::hours(1));
        let old_confirmed = booking(BookingStatus::Confirmed, Duration::hours(30));
        let expected = old_pending.id;
        for b in [old_pending, fresh_pending, old_confirmed] {
            store.insert(b).unwrap();
        }

        let cutoff = Utc::now() - Duration::hours(24);
        let stale = store.stale_in_status(BookingStatus::Pending, cutoff).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, expected);
    }
}
