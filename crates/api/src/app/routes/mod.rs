use axum::{
    Router,
    routing::{get, post},
};

pub mod bookings;
pub mod common;
pub mod gifts;
pub mod packages;
pub mod sweep;
pub mod system;
pub mod unlocks;
pub mod wallets;
pub mod webhooks;
pub mod withdrawals;

/// Router for everything except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(system::stream))
        .route("/packages", get(packages::list))
        .route("/webhooks/payment", post(webhooks::payment))
        .route("/wallets/:user_id", get(wallets::get_wallet))
        .route("/wallets/:user_id/history", get(wallets::history))
        .route("/gifts", post(gifts::send))
        .route("/unlocks", post(unlocks::unlock))
        .route("/bookings/:id/pay", post(bookings::pay))
        .route("/bookings/:id/release", post(bookings::release))
        .route("/bookings/:id/refund", post(bookings::refund))
        .route("/withdrawals", post(withdrawals::request).get(withdrawals::list))
        .route("/withdrawals/talent/:talent_id", get(withdrawals::by_talent))
        .route("/withdrawals/:id/approve", post(withdrawals::approve))
        .route("/withdrawals/:id/reject", post(withdrawals::reject))
        .route("/internal/sweep", post(sweep::trigger))
}
