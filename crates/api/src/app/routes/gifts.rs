use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto;
use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;

/// POST /gifts — send coins from one user to another.
pub async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::GiftRequest>,
) -> axum::response::Response {
    let receipt = match run_blocking(move || {
        services.gift(body.from_user, body.to_user, body.coins, body.message)
    })
    .await
    {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    (StatusCode::CREATED, Json(dto::transfer_receipt_json(&receipt))).into_response()
}
