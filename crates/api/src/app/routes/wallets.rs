use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    response::IntoResponse,
};

use coinledger_core::UserId;

use crate::app::dto;
use crate::app::routes::common::{parse_id, run_blocking};
use crate::app::services::AppServices;

const HISTORY_DEFAULT_LIMIT: u32 = 50;
const HISTORY_MAX_LIMIT: u32 = 200;

/// GET /wallets/:user_id — balance plus escrow, creating the account lazily.
pub async fn get_wallet(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user: UserId = match parse_id(&user_id, "user id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.wallet(user)).await {
        Ok(account) => Json(dto::wallet_json(&account)).into_response(),
        Err(resp) => resp,
    }
}

/// GET /wallets/:user_id/history?limit&offset — journal entries, newest first.
pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let user: UserId = match parse_id(&user_id, "user id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let limit = query
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .min(HISTORY_MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    match run_blocking(move || services.history(user, limit, offset)).await {
        Ok(entries) => Json(serde_json::json!({
            "entries": entries.iter().map(dto::entry_json).collect::<Vec<_>>(),
            "limit": limit,
            "offset": offset,
        }))
        .into_response(),
        Err(resp) => resp,
    }
}
