//! HTTP application wiring (Axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: store/engine wiring and the notification broadcast channel
//! - `routes/`: HTTP routes + handlers (one file per surface area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Shared secret guarding `POST /internal/sweep`.
#[derive(Clone)]
pub struct SweepSecret(pub Arc<str>);

/// Build the full HTTP router plus the services handle `main.rs` uses for the
/// periodic sweep.
pub async fn build_app() -> (Router, Arc<services::AppServices>) {
    let sweep_secret = std::env::var("COINLEDGER_SWEEP_SECRET").unwrap_or_else(|_| {
        tracing::warn!("COINLEDGER_SWEEP_SECRET not set; using insecure dev default");
        "dev-sweep-secret".to_string()
    });

    let services = Arc::new(services::build_services().await);

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services.clone()))
        .layer(Extension(SweepSecret(sweep_secret.into())))
        .layer(ServiceBuilder::new());

    (router, services)
}
