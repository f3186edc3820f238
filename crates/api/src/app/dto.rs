//! Request DTOs and JSON mapping helpers.

use serde::Deserialize;
use serde_json::{Value, json};

use coinledger_core::{MediaId, UserId};
use coinledger_infra::{EscrowReceipt, TransferReceipt};
use coinledger_wallet::{Account, JournalEntry, WithdrawalRequest};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub reference: String,
    pub user_id: UserId,
    pub coins: u64,
}

#[derive(Debug, Deserialize)]
pub struct GiftRequest {
    pub from_user: UserId,
    pub to_user: UserId,
    pub coins: u64,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub user_id: UserId,
    pub talent_id: UserId,
    pub media_id: MediaId,
    pub price: u64,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct NewWithdrawalRequest {
    pub talent_id: UserId,
    pub coins: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApproveWithdrawalRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectWithdrawalRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalListQuery {
    pub status: Option<String>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn wallet_json(account: &Account) -> Value {
    json!({
        "user_id": account.user_id,
        "balance": account.balance,
        "escrow_balance": account.escrow_balance,
        "total": account.total(),
        "updated_at": account.updated_at,
    })
}

pub fn entry_json(entry: &JournalEntry) -> Value {
    json!({
        "id": entry.id,
        "user_id": entry.user_id,
        "coins": entry.signed_coins,
        "kind": entry.kind.as_str(),
        "status": entry.status.as_str(),
        "reference": entry.reference,
        "related_entity": entry.related_entity,
        "counterparty": entry.counterparty,
        "description": entry.description,
        "created_at": entry.created_at,
    })
}

pub fn transfer_receipt_json(receipt: &TransferReceipt) -> Value {
    json!({
        "entry": entry_json(&receipt.entry),
        "counterpart": receipt.counterpart.as_ref().map(entry_json),
        "replayed": receipt.replayed,
    })
}

pub fn escrow_receipt_json(receipt: &EscrowReceipt) -> Value {
    json!({
        "entry": entry_json(&receipt.entry),
        "replayed": receipt.replayed,
    })
}

pub fn withdrawal_json(request: &WithdrawalRequest) -> Value {
    json!({
        "id": request.id,
        "talent_id": request.talent_id,
        "coins": request.coins,
        "status": request.status.as_str(),
        "created_at": request.created_at,
        "processed_at": request.processed_at,
        "admin_notes": request.admin_notes,
    })
}
