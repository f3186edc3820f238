use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use coinledger_core::{UserId, WithdrawalId};
use coinledger_wallet::WithdrawalStatus;

use crate::app::routes::common::{parse_id, run_blocking};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// POST /withdrawals — a talent asks to cash out. No ledger effect yet.
pub async fn request(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::NewWithdrawalRequest>,
) -> axum::response::Response {
    match run_blocking(move || services.withdrawal_request(body.talent_id, body.coins)).await {
        Ok(request) => {
            (StatusCode::CREATED, Json(dto::withdrawal_json(&request))).into_response()
        }
        Err(resp) => resp,
    }
}

/// GET /withdrawals?status=… — admin listing, defaulting to pending.
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::WithdrawalListQuery>,
) -> axum::response::Response {
    let status = match query.status.as_deref() {
        None => WithdrawalStatus::Pending,
        Some(raw) => match WithdrawalStatus::parse(raw) {
            Some(status) => status,
            None => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("unknown withdrawal status: {raw}"),
                );
            }
        },
    };

    match run_blocking(move || services.withdrawals_by_status(status)).await {
        Ok(requests) => Json(serde_json::json!({
            "withdrawals": requests.iter().map(dto::withdrawal_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

/// GET /withdrawals/talent/:talent_id — a talent's own requests.
pub async fn by_talent(
    Extension(services): Extension<Arc<AppServices>>,
    Path(talent_id): Path<String>,
) -> axum::response::Response {
    let talent: UserId = match parse_id(&talent_id, "talent id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.withdrawals_by_talent(talent)).await {
        Ok(requests) => Json(serde_json::json!({
            "withdrawals": requests.iter().map(dto::withdrawal_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

/// POST /withdrawals/:id/approve — debit the talent and mark approved.
pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ApproveWithdrawalRequest>,
) -> axum::response::Response {
    let withdrawal: WithdrawalId = match parse_id(&id, "withdrawal id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.withdrawal_approve(withdrawal, body.notes)).await {
        Ok(request) => Json(dto::withdrawal_json(&request)).into_response(),
        Err(resp) => resp,
    }
}

/// POST /withdrawals/:id/reject — decline with a reason; funds stay put.
pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectWithdrawalRequest>,
) -> axum::response::Response {
    let withdrawal: WithdrawalId = match parse_id(&id, "withdrawal id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.withdrawal_reject(withdrawal, &body.reason)).await {
        Ok(request) => Json(dto::withdrawal_json(&request)).into_response(),
        Err(resp) => resp,
    }
}
