use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::dto;
use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;

/// POST /webhooks/payment — provider confirms a coin purchase.
///
/// Safe to retry: the payment reference makes replays return the original
/// receipt instead of crediting twice.
pub async fn payment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PaymentWebhookRequest>,
) -> axum::response::Response {
    let receipt = match run_blocking(move || {
        services.credit_purchase(body.user_id, body.coins, &body.reference)
    })
    .await
    {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    Json(dto::transfer_receipt_json(&receipt)).into_response()
}
