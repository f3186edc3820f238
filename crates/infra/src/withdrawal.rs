//! Withdrawal workflow: request, approve, reject.
//!
//! A request reserves nothing; the balance is re-checked and debited at
//! approval time. The conditional pending→terminal status transition is the
//! serialization point, so two simultaneous approvals produce exactly one
//! debit.

use std::sync::Arc;

use tracing::{error, instrument};

use coinledger_core::{LedgerError, LedgerResult, UserId, WithdrawalId};
use coinledger_wallet::{
    EntryKind, NewJournalEntry, Pocket, WithdrawalRequest, WithdrawalStatus,
};

use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{AccountStore, CasOutcome, JournalStore, WithdrawalStore};
use crate::transfer::debit_with_retry;

pub struct WithdrawalWorkflow<A, J, W> {
    accounts: A,
    journal: J,
    withdrawals: W,
    sink: Arc<dyn NotificationSink>,
}

impl<A, J, W> WithdrawalWorkflow<A, J, W>
where
    A: AccountStore,
    J: JournalStore,
    W: WithdrawalStore,
{
    pub fn new(accounts: A, journal: J, withdrawals: W, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            accounts,
            journal,
            withdrawals,
            sink,
        }
    }

    /// Create a pending request. No ledger effect.
    #[instrument(skip(self), fields(talent_id = %talent_id, coins), err)]
    pub fn request(&self, talent_id: UserId, coins: u64) -> LedgerResult<WithdrawalRequest> {
        let request = WithdrawalRequest::new(talent_id, coins)?;
        self.withdrawals.insert(request.clone())?;
        Ok(request)
    }

    /// Approve a pending request: re-check the balance, debit, then mark
    /// approved conditionally. If the status transition is lost after the
    /// debit, the debit is compensated before returning.
    #[instrument(skip(self, notes), fields(id = %id), err)]
    pub fn approve(
        &self,
        id: WithdrawalId,
        notes: Option<String>,
    ) -> LedgerResult<WithdrawalRequest> {
        let request = self
            .withdrawals
            .get(id)?
            .ok_or_else(|| LedgerError::not_found("withdrawal request", id))?;

        if request.status != WithdrawalStatus::Pending {
            return Err(LedgerError::invalid_state(format!(
                "withdrawal request is already {}",
                request.status.as_str()
            )));
        }

        debit_with_retry(
            &self.accounts,
            request.talent_id,
            Pocket::Spendable,
            request.coins,
        )?;

        let transition =
            self.withdrawals
                .transition(id, WithdrawalStatus::Approved, notes)?;
        if transition == CasOutcome::Lost {
            // Another admin got there first; never leave a debited-but-
            // unmarked request behind.
            self.accounts
                .credit(request.talent_id, Pocket::Spendable, request.coins)?;
            return Err(LedgerError::invalid_state(
                "withdrawal request is no longer pending",
            ));
        }

        // The conditional status transition is the commit point: once the
        // request is approved, unwinding the debit would hand coins back on
        // a payout that is going out. A journal outage here costs the audit
        // record only, so log it loudly and carry on.
        if let Err(e) = self.journal.append(
            NewJournalEntry::debit(request.talent_id, request.coins, EntryKind::Withdrawal)?
                .with_related(request.id)
                .with_description(format!("Withdrawal of {} coins approved", request.coins)),
        ) {
            error!(
                id = %id,
                talent_id = %request.talent_id,
                coins = request.coins,
                error = %e,
                "failed to journal approved withdrawal"
            );
        }

        self.sink.notify(Notification::new(
            request.talent_id,
            NotificationKind::WithdrawalApproved,
            "Withdrawal approved",
            format!("Your withdrawal of {} coins was approved", request.coins),
        ));

        self.withdrawals
            .get(id)?
            .ok_or_else(|| LedgerError::not_found("withdrawal request", id))
    }

    /// Reject a pending request with a reason. No ledger effect.
    #[instrument(skip(self, reason), fields(id = %id), err)]
    pub fn reject(&self, id: WithdrawalId, reason: &str) -> LedgerResult<WithdrawalRequest> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("a rejection reason is required"));
        }

        let request = self
            .withdrawals
            .get(id)?
            .ok_or_else(|| LedgerError::not_found("withdrawal request", id))?;

        let transition = self.withdrawals.transition(
            id,
            WithdrawalStatus::Rejected,
            Some(reason.to_string()),
        )?;
        if transition == CasOutcome::Lost {
            return Err(LedgerError::invalid_state(format!(
                "withdrawal request is already {}",
                request.status.as_str()
            )));
        }

        self.sink.notify(Notification::new(
            request.talent_id,
            NotificationKind::WithdrawalRejected,
            "Withdrawal rejected",
            reason.to_string(),
        ));

        self.withdrawals
            .get(id)?
            .ok_or_else(|| LedgerError::not_found("withdrawal request", id))
    }

    /// Admin listing by status.
    pub fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> LedgerResult<Vec<WithdrawalRequest>> {
        Ok(self.withdrawals.list_by_status(status)?)
    }

    /// A talent's own requests.
    pub fn list_by_talent(&self, talent_id: UserId) -> LedgerResult<Vec<WithdrawalRequest>> {
        Ok(self.withdrawals.list_by_talent(talent_id)?)
    }
}
