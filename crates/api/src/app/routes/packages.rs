use axum::Json;

use coinledger_wallet::COIN_PACKAGES;

/// GET /packages — the purchasable coin catalog.
pub async fn list() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "packages": COIN_PACKAGES }))
}
