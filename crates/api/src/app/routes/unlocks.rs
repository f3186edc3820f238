use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto;
use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;

/// POST /unlocks — pay a talent to unlock premium media.
///
/// A user unlocks a given media item at most once; a second submission
/// replays the original receipt without moving coins.
pub async fn unlock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::UnlockRequest>,
) -> axum::response::Response {
    let receipt = match run_blocking(move || {
        services.unlock(body.user_id, body.talent_id, body.media_id, body.price)
    })
    .await
    {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(dto::transfer_receipt_json(&receipt))).into_response()
}
