use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;

use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;
use crate::app::{SweepSecret, errors};

/// POST /internal/sweep — expire stale bookings now and return the report.
///
/// Bearer-guarded: meant for a scheduler, not end users.
pub async fn trigger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(secret): Extension<SweepSecret>,
    headers: HeaderMap,
) -> axum::response::Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret.0.as_ref());
    if !authorized {
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid sweep token",
        );
    }

    match run_blocking(move || Ok(services.sweep(Utc::now()))).await {
        Ok(report) => Json(report).into_response(),
        Err(resp) => resp,
    }
}
