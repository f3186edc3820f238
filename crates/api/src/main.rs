use std::sync::Arc;
use std::time::Duration;

use coinledger_api::app::services::AppServices;

#[tokio::main]
async fn main() {
    coinledger_observability::init();

    let (app, services) = coinledger_api::app::build_app().await;

    if let Ok(raw) = std::env::var("COINLEDGER_SWEEP_INTERVAL_SECS") {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => spawn_sweep_loop(services, Duration::from_secs(secs)),
            _ => tracing::warn!(
                value = %raw,
                "COINLEDGER_SWEEP_INTERVAL_SECS is not a positive integer; periodic sweep disabled"
            ),
        }
    }

    let addr =
        std::env::var("COINLEDGER_API_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

/// Periodically expire stale bookings. The sweep itself reports per-booking
/// failures in its summary log; only scheduling failures surface here.
fn spawn_sweep_loop(services: Arc<AppServices>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let services = services.clone();
            if let Err(err) =
                tokio::task::spawn_blocking(move || services.sweep(chrono::Utc::now())).await
            {
                tracing::error!(error = %err, "booking expiry sweep task panicked");
            }
        }
    });
}
