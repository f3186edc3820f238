//! Account storage (one row per user, two pockets).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{Span, instrument};

use coinledger_core::{LedgerError, UserId};
use coinledger_wallet::{Account, Pocket};

use super::{CasOutcome, describe_sqlx_error, runtime_handle};

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("account not found: {0}")]
    NotFound(UserId),

    #[error("account storage failure: {0}")]
    Backend(String),
}

impl From<AccountStoreError> for LedgerError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NotFound(id) => LedgerError::not_found("account", id),
            AccountStoreError::Backend(msg) => LedgerError::storage(msg),
        }
    }
}

/// Persistent account table.
///
/// The contract deliberately offers no general-purpose update: debits go
/// through `compare_and_set` (the sole concurrency-control mechanism) and
/// credits through the unconditional `credit` increment, which cannot
/// produce a negative balance.
pub trait AccountStore: Send + Sync {
    /// Load an account, creating it with zero balances if absent.
    fn get_or_create(&self, user_id: UserId) -> Result<Account, AccountStoreError>;

    fn get(&self, user_id: UserId) -> Result<Option<Account>, AccountStoreError>;

    /// Set `pocket` to `new_value` only if it still holds `expected`.
    ///
    /// `Lost` means a concurrent writer got there first; the caller re-reads
    /// and retries (bounded) or gives up with `Contended`.
    fn compare_and_set(
        &self,
        user_id: UserId,
        pocket: Pocket,
        expected: u64,
        new_value: u64,
    ) -> Result<CasOutcome, AccountStoreError>;

    /// Unconditional single-row increment of a pocket, creating the account
    /// if needed.
    fn credit(&self, user_id: UserId, pocket: Pocket, amount: u64)
    -> Result<(), AccountStoreError>;
}

impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    fn get_or_create(&self, user_id: UserId) -> Result<Account, AccountStoreError> {
        (**self).get_or_create(user_id)
    }

    fn get(&self, user_id: UserId) -> Result<Option<Account>, AccountStoreError> {
        (**self).get(user_id)
    }

    fn compare_and_set(
        &self,
        user_id: UserId,
        pocket: Pocket,
        expected: u64,
        new_value: u64,
    ) -> Result<CasOutcome, AccountStoreError> {
        (**self).compare_and_set(user_id, pocket, expected, new_value)
    }

    fn credit(
        &self,
        user_id: UserId,
        pocket: Pocket,
        amount: u64,
    ) -> Result<(), AccountStoreError> {
        (**self).credit(user_id, pocket, amount)
    }
}

/// In-memory account store for tests/dev.
///
/// The `RwLock` gives the same single-row atomicity the Postgres
/// implementation gets from conditional UPDATEs; it is not a shortcut the
/// engines rely on.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn get_or_create(&self, user_id: UserId) -> Result<Account, AccountStoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))?;

        Ok(accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
            .clone())
    }

    fn get(&self, user_id: UserId) -> Result<Option<Account>, AccountStoreError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))?;

        Ok(accounts.get(&user_id).cloned())
    }

    fn compare_and_set(
        &self,
        user_id: UserId,
        pocket: Pocket,
        expected: u64,
        new_value: u64,
    ) -> Result<CasOutcome, AccountStoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))?;

        let account = accounts
            .get_mut(&user_id)
            .ok_or(AccountStoreError::NotFound(user_id))?;

        let slot = match pocket {
            Pocket::Spendable => &mut account.balance,
            Pocket::Escrow => &mut account.escrow_balance,
        };

        if *slot != expected {
            return Ok(CasOutcome::Lost);
        }

        *slot = new_value;
        account.updated_at = Utc::now();
        Ok(CasOutcome::Applied)
    }

    fn credit(
        &self,
        user_id: UserId,
        pocket: Pocket,
        amount: u64,
    ) -> Result<(), AccountStoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))?;

        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id));

        match pocket {
            Pocket::Spendable => account.balance += amount,
            Pocket::Escrow => account.escrow_balance += amount,
        }
        account.updated_at = Utc::now();
        Ok(())
    }
}

/// Postgres-backed account store.
///
/// One row per user; conditional updates carry the read value in the WHERE
/// clause, so a concurrent change makes the UPDATE match zero rows (`Lost`).
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_or_create_account(
        &self,
        user_id: UserId,
    ) -> Result<Account, AccountStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, balance, escrow_balance)
            VALUES ($1, 0, 0)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING user_id, balance, escrow_balance, updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| AccountStoreError::Backend(describe_sqlx_error("get_or_create", &e)))?;

        account_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, AccountStoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, balance, escrow_balance, updated_at
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| AccountStoreError::Backend(describe_sqlx_error("get", &e)))?;

        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(
        skip(self),
        fields(user_id = %user_id, pocket = ?pocket, expected, new_value, cas = tracing::field::Empty),
        err
    )]
    pub async fn cas_pocket(
        &self,
        user_id: UserId,
        pocket: Pocket,
        expected: u64,
        new_value: u64,
    ) -> Result<CasOutcome, AccountStoreError> {
        let span = Span::current();

        let sql = match pocket {
            Pocket::Spendable => {
                r#"
                UPDATE accounts
                SET balance = $3, updated_at = NOW()
                WHERE user_id = $1 AND balance = $2
                "#
            }
            Pocket::Escrow => {
                r#"
                UPDATE accounts
                SET escrow_balance = $3, updated_at = NOW()
                WHERE user_id = $1 AND escrow_balance = $2
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(user_id.as_uuid())
            .bind(expected as i64)
            .bind(new_value as i64)
            .execute(&*self.pool)
            .await
            .map_err(|e| AccountStoreError::Backend(describe_sqlx_error("compare_and_set", &e)))?;

        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing row.
            let exists = self.get_account(user_id).await?.is_some();
            if !exists {
                return Err(AccountStoreError::NotFound(user_id));
            }
            span.record("cas", "lost");
            return Ok(CasOutcome::Lost);
        }

        span.record("cas", "applied");
        Ok(CasOutcome::Applied)
    }

    #[instrument(skip(self), fields(user_id = %user_id, pocket = ?pocket, amount), err)]
    pub async fn credit_pocket(
        &self,
        user_id: UserId,
        pocket: Pocket,
        amount: u64,
    ) -> Result<(), AccountStoreError> {
        let sql = match pocket {
            Pocket::Spendable => {
                r#"
                INSERT INTO accounts (user_id, balance, escrow_balance)
                VALUES ($1, $2, 0)
                ON CONFLICT (user_id) DO UPDATE
                SET balance = accounts.balance + EXCLUDED.balance, updated_at = NOW()
                "#
            }
            Pocket::Escrow => {
                r#"
                INSERT INTO accounts (user_id, balance, escrow_balance)
                VALUES ($1, 0, $2)
                ON CONFLICT (user_id) DO UPDATE
                SET escrow_balance = accounts.escrow_balance + EXCLUDED.escrow_balance,
                    updated_at = NOW()
                "#
            }
        };

        sqlx::query(sql)
            .bind(user_id.as_uuid())
            .bind(amount as i64)
            .execute(&*self.pool)
            .await
            .map_err(|e| AccountStoreError::Backend(describe_sqlx_error("credit", &e)))?;

        Ok(())
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, AccountStoreError> {
    let read = |what: &str, e: sqlx::Error| {
        AccountStoreError::Backend(format!("failed to read {what}: {e}"))
    };

    let user_id: uuid::Uuid = row.try_get("user_id").map_err(|e| read("user_id", e))?;
    let balance: i64 = row.try_get("balance").map_err(|e| read("balance", e))?;
    let escrow_balance: i64 = row
        .try_get("escrow_balance")
        .map_err(|e| read("escrow_balance", e))?;
    let updated_at = row
        .try_get("updated_at")
        .map_err(|e| read("updated_at", e))?;

    Ok(Account {
        user_id: UserId::from_uuid(user_id),
        balance: balance as u64,
        escrow_balance: escrow_balance as u64,
        updated_at,
    })
}

impl AccountStore for PostgresAccountStore {
    fn get_or_create(&self, user_id: UserId) -> Result<Account, AccountStoreError> {
        let handle =
            runtime_handle("PostgresAccountStore").map_err(AccountStoreError::Backend)?;
        handle.block_on(self.get_or_create_account(user_id))
    }

    fn get(&self, user_id: UserId) -> Result<Option<Account>, AccountStoreError> {
        let handle =
            runtime_handle("PostgresAccountStore").map_err(AccountStoreError::Backend)?;
        handle.block_on(self.get_account(user_id))
    }

    fn compare_and_set(
        &self,
        user_id: UserId,
        pocket: Pocket,
        expected: u64,
        new_value: u64,
    ) -> Result<CasOutcome, AccountStoreError> {
        let handle =
            runtime_handle("PostgresAccountStore").map_err(AccountStoreError::Backend)?;
        handle.block_on(self.cas_pocket(user_id, pocket, expected, new_value))
    }

    fn credit(
        &self,
        user_id: UserId,
        pocket: Pocket,
        amount: u64,
    ) -> Result<(), AccountStoreError> {
        let handle =
            runtime_handle("PostgresAccountStore").map_err(AccountStoreError::Backend)?;
        handle.block_on(self.credit_pocket(user_id, pocket, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_lazy_and_stable() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();

        assert!(store.get(user).unwrap().is_none());

        let created = store.get_or_create(user).unwrap();
        assert_eq!(created.balance, 0);
        assert_eq!(created.escrow_balance, 0);

        store.credit(user, Pocket::Spendable, 300).unwrap();
        let again = store.get_or_create(user).unwrap();
        assert_eq!(again.balance, 300);
    }

    #[test]
    fn cas_applies_only_on_matching_expectation() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.credit(user, Pocket::Spendable, 1000).unwrap();

        let lost = store
            .compare_and_set(user, Pocket::Spendable, 999, 400)
            .unwrap();
        assert_eq!(lost, CasOutcome::Lost);
        assert_eq!(store.get(user).unwrap().unwrap().balance, 1000);

        let applied = store
            .compare_and_set(user, Pocket::Spendable, 1000, 400)
            .unwrap();
        assert_eq!(applied, CasOutcome::Applied);
        assert_eq!(store.get(user).unwrap().unwrap().balance, 400);
    }

    #[test]
    fn cas_on_missing_account_is_not_found() {
        let store = InMemoryAccountStore::new();
        let err = store
            .compare_and_set(UserId::new(), Pocket::Spendable, 0, 10)
            .unwrap_err();
        assert!(matches!(err, AccountStoreError::NotFound(_)));
    }

    #[test]
    fn pockets_are_independent() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();

        store.credit(user, Pocket::Spendable, 400).unwrap();
        store.credit(user, Pocket::Escrow, 600).unwrap();

        let account = store.get(user).unwrap().unwrap();
        assert_eq!(account.balance, 400);
        assert_eq!(account.escrow_balance, 600);

        store
            .compare_and_set(user, Pocket::Escrow, 600, 0)
            .unwrap();
        let account = store.get(user).unwrap().unwrap();
        assert_eq!(account.balance, 400);
        assert_eq!(account.escrow_balance, 0);
    }
}
