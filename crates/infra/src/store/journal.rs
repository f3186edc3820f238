//! Journal storage (append-only).

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use coinledger_core::{EntryId, LedgerError, UserId};
use coinledger_wallet::{EntryKind, EntryStatus, JournalEntry, NewJournalEntry};

use super::{describe_sqlx_error, is_unique_violation, runtime_handle};

#[derive(Debug, Error)]
pub enum JournalError {
    /// A non-failed entry with this reference already exists. Not a ledger
    /// error in itself: engines resolve it to an idempotent replay.
    #[error("duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("journal storage failure: {0}")]
    Backend(String),
}

impl From<JournalError> for LedgerError {
    fn from(err: JournalError) -> Self {
        match err {
            // Reaching here means an engine failed to resolve the duplicate
            // into a replay; surface it as a conflict.
            JournalError::DuplicateReference(reference) => {
                LedgerError::invalid_state(format!("reference already journaled: {reference}"))
            }
            JournalError::Backend(msg) => LedgerError::storage(msg),
        }
    }
}

/// Append-only journal of value movements.
///
/// `reference` is unique among non-failed entries: a failed attempt does not
/// poison its reference, so the caller may retry it.
pub trait JournalStore: Send + Sync {
    fn append(&self, entry: NewJournalEntry) -> Result<JournalEntry, JournalError>;

    /// The completed entry carrying `reference`, if any.
    fn find_completed_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<JournalEntry>, JournalError>;

    /// The completed entry for `user_id` of `kind` related to `related`, if
    /// any. Drives related-entity idempotency (booking release/refund, media
    /// unlock).
    fn find_completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> Result<Option<JournalEntry>, JournalError>;

    /// A user's entries, newest first.
    fn history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JournalEntry>, JournalError>;
}

impl<S> JournalStore for Arc<S>
where
    S: JournalStore + ?Sized,
{
    fn append(&self, entry: NewJournalEntry) -> Result<JournalEntry, JournalError> {
        (**self).append(entry)
    }

    fn find_completed_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        (**self).find_completed_by_reference(reference)
    }

    fn find_completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> Result<Option<JournalEntry>, JournalError> {
        (**self).find_completed_related(user_id, kind, related)
    }

    fn history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        (**self).history(user_id, limit, offset)
    }
}

/// In-memory journal for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJournalStore {
    entries: RwLock<Vec<JournalEntry>>,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, oldest first. Test helper.
    pub fn all(&self) -> Vec<JournalEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

impl JournalStore for InMemoryJournalStore {
    fn append(&self, entry: NewJournalEntry) -> Result<JournalEntry, JournalError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| JournalError::Backend("lock poisoned".to_string()))?;

        // Uniqueness over non-failed references, mirroring the partial
        // unique index in Postgres.
        if entry.status != EntryStatus::Failed {
            if let Some(reference) = &entry.reference {
                let taken = entries
                    .iter()
                    .any(|e| e.status != EntryStatus::Failed && e.reference.as_ref() == Some(reference));
                if taken {
                    return Err(JournalError::DuplicateReference(reference.clone()));
                }
            }
        }

        let stored = JournalEntry {
            id: EntryId::new(),
            user_id: entry.user_id,
            signed_coins: entry.signed_coins,
            kind: entry.kind,
            status: entry.status,
            reference: entry.reference,
            related_entity: entry.related_entity,
            counterparty: entry.counterparty,
            description: entry.description,
            created_at: Utc::now(),
        };
        entries.push(stored.clone());
        Ok(stored)
    }

    fn find_completed_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JournalError::Backend("lock poisoned".to_string()))?;

        Ok(entries
            .iter()
            .find(|e| e.status == EntryStatus::Completed && e.reference.as_deref() == Some(reference))
            .cloned())
    }

    fn find_completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JournalError::Backend("lock poisoned".to_string()))?;

        Ok(entries
            .iter()
            .find(|e| {
                e.status == EntryStatus::Completed
                    && e.user_id == user_id
                    && e.kind == kind
                    && e.related_entity == Some(related)
            })
            .cloned())
    }

    fn history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JournalError::Backend("lock poisoned".to_string()))?;

        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Postgres-backed journal.
///
/// Relies on a partial unique index over `reference` for non-failed rows:
///
/// ```sql
/// CREATE UNIQUE INDEX journal_entries_reference_key
///     ON journal_entries (reference)
///     WHERE reference IS NOT NULL AND status <> 'failed';
/// ```
#[derive(Debug, Clone)]
pub struct PostgresJournalStore {
    pool: Arc<PgPool>,
}

impl PostgresJournalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(
        skip(self, entry),
        fields(user_id = %entry.user_id, kind = entry.kind.as_str(), signed_coins = entry.signed_coins),
        err
    )]
    pub async fn append_entry(
        &self,
        entry: NewJournalEntry,
    ) -> Result<JournalEntry, JournalError> {
        let id = EntryId::new();

        let row = sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, user_id, signed_coins, kind, status,
                reference, related_entity, counterparty, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.signed_coins)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(entry.reference.as_deref())
        .bind(entry.related_entity)
        .bind(entry.counterparty.map(|c| *c.as_uuid()))
        .bind(entry.description.as_deref())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JournalError::DuplicateReference(entry.reference.clone().unwrap_or_default())
            } else {
                JournalError::Backend(describe_sqlx_error("append", &e))
            }
        })?;

        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| JournalError::Backend(format!("failed to read created_at: {e}")))?;

        Ok(JournalEntry {
            id,
            user_id: entry.user_id,
            signed_coins: entry.signed_coins,
            kind: entry.kind,
            status: entry.status,
            reference: entry.reference,
            related_entity: entry.related_entity,
            counterparty: entry.counterparty,
            description: entry.description,
            created_at,
        })
    }

    #[instrument(skip(self), fields(reference), err)]
    pub async fn completed_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, signed_coins, kind, status,
                   reference, related_entity, counterparty, description, created_at
            FROM journal_entries
            WHERE reference = $1 AND status = 'completed'
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| JournalError::Backend(describe_sqlx_error("find_by_reference", &e)))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(
        skip(self),
        fields(user_id = %user_id, kind = kind.as_str(), related = %related),
        err
    )]
    pub async fn completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, signed_coins, kind, status,
                   reference, related_entity, counterparty, description, created_at
            FROM journal_entries
            WHERE user_id = $1 AND kind = $2 AND related_entity = $3
              AND status = 'completed'
            LIMIT 1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(kind.as_str())
        .bind(related)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| JournalError::Backend(describe_sqlx_error("find_related", &e)))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id, limit, offset), err)]
    pub async fn user_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, signed_coins, kind, status,
                   reference, related_entity, counterparty, description, created_at
            FROM journal_entries
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| JournalError::Backend(describe_sqlx_error("history", &e)))?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<JournalEntry, JournalError> {
    let read =
        |what: &str, e: sqlx::Error| JournalError::Backend(format!("failed to read {what}: {e}"));

    let id: Uuid = row.try_get("id").map_err(|e| read("id", e))?;
    let user_id: Uuid = row.try_get("user_id").map_err(|e| read("user_id", e))?;
    let signed_coins: i64 = row
        .try_get("signed_coins")
        .map_err(|e| read("signed_coins", e))?;
    let kind: String = row.try_get("kind").map_err(|e| read("kind", e))?;
    let status: String = row.try_get("status").map_err(|e| read("status", e))?;
    let reference: Option<String> = row.try_get("reference").map_err(|e| read("reference", e))?;
    let related_entity: Option<Uuid> = row
        .try_get("related_entity")
        .map_err(|e| read("related_entity", e))?;
    let counterparty: Option<Uuid> = row
        .try_get("counterparty")
        .map_err(|e| read("counterparty", e))?;
    let description: Option<String> = row
        .try_get("description")
        .map_err(|e| read("description", e))?;
    let created_at = row
        .try_get("created_at")
        .map_err(|e| read("created_at", e))?;

    Ok(JournalEntry {
        id: EntryId::from_uuid(id),
        user_id: UserId::from_uuid(user_id),
        signed_coins,
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| JournalError::Backend(format!("unknown entry kind: {kind}")))?,
        status: EntryStatus::parse(&status)
            .ok_or_else(|| JournalError::Backend(format!("unknown entry status: {status}")))?,
        reference,
        related_entity,
        counterparty: counterparty.map(UserId::from_uuid),
        description,
        created_at,
    })
}

impl JournalStore for PostgresJournalStore {
    fn append(&self, entry: NewJournalEntry) -> Result<JournalEntry, JournalError> {
        let handle = runtime_handle("PostgresJournalStore").map_err(JournalError::Backend)?;
        handle.block_on(self.append_entry(entry))
    }

    fn find_completed_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let handle = runtime_handle("PostgresJournalStore").map_err(JournalError::Backend)?;
        handle.block_on(self.completed_by_reference(reference))
    }

    fn find_completed_related(
        &self,
        user_id: UserId,
        kind: EntryKind,
        related: Uuid,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let handle = runtime_handle("PostgresJournalStore").map_err(JournalError::Backend)?;
        handle.block_on(self.completed_related(user_id, kind, related))
    }

    fn history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let handle = runtime_handle("PostgresJournalStore").map_err(JournalError::Backend)?;
        handle.block_on(self.user_history(user_id, limit, offset))
    }
}
