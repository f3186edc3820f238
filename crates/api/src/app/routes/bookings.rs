use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    response::IntoResponse,
};

use coinledger_core::BookingId;

use crate::app::dto;
use crate::app::routes::common::{parse_id, run_blocking};
use crate::app::services::AppServices;

/// POST /bookings/:id/pay — move the booking price into escrow.
pub async fn pay(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let booking: BookingId = match parse_id(&id, "booking id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.booking_pay(booking)).await {
        Ok(receipt) => Json(dto::escrow_receipt_json(&receipt)).into_response(),
        Err(resp) => resp,
    }
}

/// POST /bookings/:id/release — pay the held escrow out to the talent.
pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let booking: BookingId = match parse_id(&id, "booking id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.booking_release(booking)).await {
        Ok(receipt) => Json(dto::escrow_receipt_json(&receipt)).into_response(),
        Err(resp) => resp,
    }
}

/// POST /bookings/:id/refund — return the held escrow to the client.
pub async fn refund(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RefundRequest>,
) -> axum::response::Response {
    let booking: BookingId = match parse_id(&id, "booking id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_blocking(move || services.booking_refund(booking, &body.reason)).await {
        Ok(receipt) => Json(dto::escrow_receipt_json(&receipt)).into_response(),
        Err(resp) => resp,
    }
}
