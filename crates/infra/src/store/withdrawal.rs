//! Withdrawal request storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use coinledger_core::{LedgerError, UserId, WithdrawalId};
use coinledger_wallet::{WithdrawalRequest, WithdrawalStatus};

use super::{CasOutcome, describe_sqlx_error, runtime_handle};

#[derive(Debug, Error)]
pub enum WithdrawalStoreError {
    #[error("withdrawal request not found: {0}")]
    NotFound(WithdrawalId),

    #[error("withdrawal storage failure: {0}")]
    Backend(String),
}

impl From<WithdrawalStoreError> for LedgerError {
    fn from(err: WithdrawalStoreError) -> Self {
        match err {
            WithdrawalStoreError::NotFound(id) => LedgerError::not_found("withdrawal request", id),
            WithdrawalStoreError::Backend(msg) => LedgerError::storage(msg),
        }
    }
}

/// Withdrawal request table.
///
/// `transition` is the serialization point for the approve/reject race: it
/// moves a request out of `pending` conditionally, so exactly one of two
/// concurrent admins wins.
pub trait WithdrawalStore: Send + Sync {
    fn insert(&self, request: WithdrawalRequest) -> Result<(), WithdrawalStoreError>;

    fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, WithdrawalStoreError>;

    /// `pending` → `to`, recording `processed_at` and `admin_notes`. `Lost`
    /// if the request is no longer pending.
    fn transition(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        notes: Option<String>,
    ) -> Result<CasOutcome, WithdrawalStoreError>;

    fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError>;

    fn list_by_talent(
        &self,
        talent_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError>;
}

impl<S> WithdrawalStore for Arc<S>
where
    S: WithdrawalStore + ?Sized,
{
    fn insert(&self, request: WithdrawalRequest) -> Result<(), WithdrawalStoreError> {
        (**self).insert(request)
    }

    fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, WithdrawalStoreError> {
        (**self).get(id)
    }

    fn transition(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        notes: Option<String>,
    ) -> Result<CasOutcome, WithdrawalStoreError> {
        (**self).transition(id, to, notes)
    }

    fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        (**self).list_by_status(status)
    }

    fn list_by_talent(
        &self,
        talent_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        (**self).list_by_talent(talent_id)
    }
}

/// In-memory withdrawal store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWithdrawalStore {
    requests: RwLock<HashMap<WithdrawalId, WithdrawalRequest>>,
}

impl InMemoryWithdrawalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WithdrawalStore for InMemoryWithdrawalStore {
    fn insert(&self, request: WithdrawalRequest) -> Result<(), WithdrawalStoreError> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| WithdrawalStoreError::Backend("lock poisoned".to_string()))?;
        requests.insert(request.id, request);
        Ok(())
    }

    fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, WithdrawalStoreError> {
        let requests = self
            .requests
            .read()
            .map_err(|_| WithdrawalStoreError::Backend("lock poisoned".to_string()))?;
        Ok(requests.get(&id).cloned())
    }

    fn transition(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        notes: Option<String>,
    ) -> Result<CasOutcome, WithdrawalStoreError> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| WithdrawalStoreError::Backend("lock poisoned".to_string()))?;

        let request = requests
            .get_mut(&id)
            .ok_or(WithdrawalStoreError::NotFound(id))?;

        if request.status != WithdrawalStatus::Pending {
            return Ok(CasOutcome::Lost);
        }

        request.status = to;
        request.processed_at = Some(Utc::now());
        request.admin_notes = notes;
        Ok(CasOutcome::Applied)
    }

    fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let requests = self
            .requests
            .read()
            .map_err(|_| WithdrawalStoreError::Backend("lock poisoned".to_string()))?;

        let mut matching: Vec<_> = requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(matching)
    }

    fn list_by_talent(
        &self,
        talent_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let requests = self
            .requests
            .read()
            .map_err(|_| WithdrawalStoreError::Backend("lock poisoned".to_string()))?;

        let mut matching: Vec<_> = requests
            .values()
            .filter(|r| r.talent_id == talent_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(matching)
    }
}

/// Postgres-backed withdrawal store.
#[derive(Debug, Clone)]
pub struct PostgresWithdrawalStore {
    pool: Arc<PgPool>,
}

impl PostgresWithdrawalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, request),
        fields(id = %request.id, talent_id = %request.talent_id, coins = request.coins),
        err
    )]
    pub async fn insert_request(
        &self,
        request: WithdrawalRequest,
    ) -> Result<(), WithdrawalStoreError> {
        sqlx::query(
            r#"
            INSERT INTO withdrawal_requests (
                id, talent_id, coins, status, created_at, processed_at, admin_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.talent_id.as_uuid())
        .bind(request.coins as i64)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.processed_at)
        .bind(request.admin_notes.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| WithdrawalStoreError::Backend(describe_sqlx_error("insert", &e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(id = %id), err)]
    pub async fn get_request(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>, WithdrawalStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, talent_id, coins, status, created_at, processed_at, admin_notes
            FROM withdrawal_requests
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| WithdrawalStoreError::Backend(describe_sqlx_error("get", &e)))?;

        row.as_ref().map(request_from_row).transpose()
    }

    #[instrument(skip(self, notes), fields(id = %id, to = to.as_str()), err)]
    pub async fn transition_request(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        notes: Option<String>,
    ) -> Result<CasOutcome, WithdrawalStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = $2, processed_at = NOW(), admin_notes = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(notes.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| WithdrawalStoreError::Backend(describe_sqlx_error("transition", &e)))?;

        if result.rows_affected() == 0 {
            let exists = self.get_request(id).await?.is_some();
            if !exists {
                return Err(WithdrawalStoreError::NotFound(id));
            }
            return Ok(CasOutcome::Lost);
        }

        Ok(CasOutcome::Applied)
    }

    #[instrument(skip(self), fields(status = status.as_str()), err)]
    pub async fn requests_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, talent_id, coins, status, created_at, processed_at, admin_notes
            FROM withdrawal_requests
            WHERE status = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| WithdrawalStoreError::Backend(describe_sqlx_error("list_by_status", &e)))?;

        rows.iter().map(request_from_row).collect()
    }

    #[instrument(skip(self), fields(talent_id = %talent_id), err)]
    pub async fn requests_by_talent(
        &self,
        talent_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, talent_id, coins, status, created_at, processed_at, admin_notes
            FROM withdrawal_requests
            WHERE talent_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(talent_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| WithdrawalStoreError::Backend(describe_sqlx_error("list_by_talent", &e)))?;

        rows.iter().map(request_from_row).collect()
    }
}

fn request_from_row(row: &sqlx::postgres::PgRow) -> Result<WithdrawalRequest, WithdrawalStoreError> {
    let read = |what: &str, e: sqlx::Error| {
        WithdrawalStoreError::Backend(format!("failed to read {what}: {e}"))
    };

    let id: Uuid = row.try_get("id").map_err(|e| read("id", e))?;
    let talent_id: Uuid = row.try_get("talent_id").map_err(|e| read("talent_id", e))?;
    let coins: i64 = row.try_get("coins").map_err(|e| read("coins", e))?;
    let status: String = row.try_get("status").map_err(|e| read("status", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| read("created_at", e))?;
    let processed_at: Option<DateTime<Utc>> = row
        .try_get("processed_at")
        .map_err(|e| read("processed_at", e))?;
    let admin_notes: Option<String> = row
        .try_get("admin_notes")
        .map_err(|e| read("admin_notes", e))?;

    Ok(WithdrawalRequest {
        id: WithdrawalId::from_uuid(id),
        talent_id: UserId::from_uuid(talent_id),
        coins: coins as u64,
        status: WithdrawalStatus::parse(&status)
            .ok_or_else(|| WithdrawalStoreError::Backend(format!("unknown status: {status}")))?,
        created_at,
        processed_at,
        admin_notes,
    })
}

impl WithdrawalStore for PostgresWithdrawalStore {
    fn insert(&self, request: WithdrawalRequest) -> Result<(), WithdrawalStoreError> {
        let handle =
            runtime_handle("PostgresWithdrawalStore").map_err(WithdrawalStoreError::Backend)?;
        handle.block_on(self.insert_request(request))
    }

    fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, WithdrawalStoreError> {
        let handle =
            runtime_handle("PostgresWithdrawalStore").map_err(WithdrawalStoreError::Backend)?;
        handle.block_on(self.get_request(id))
    }

    fn transition(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        notes: Option<String>,
    ) -> Result<CasOutcome, WithdrawalStoreError> {
        let handle =
            runtime_handle("PostgresWithdrawalStore").map_err(WithdrawalStoreError::Backend)?;
        handle.block_on(self.transition_request(id, to, notes))
    }

    fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let handle =
            runtime_handle("PostgresWithdrawalStore").map_err(WithdrawalStoreError::Backend)?;
        handle.block_on(self.requests_by_status(status))
    }

    fn list_by_talent(
        &self,
        talent_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalStoreError> {
        let handle =
            runtime_handle("PostgresWithdrawalStore").map_err(WithdrawalStoreError::Backend)?;
        handle.block_on(self.requests_by_talent(talent_id))
    }
}
