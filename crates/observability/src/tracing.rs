//! Subscriber initialization.
//!
//! Output defaults to JSON lines for log shippers; set
//! `COINLEDGER_LOG_FORMAT=pretty` for local development. Level filtering
//! follows `RUST_LOG` with an `info` fallback.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Safe to call more than once; only the first call takes effect. Tests that
/// want log output can call this from a fixture without coordination.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let pretty = std::env::var("COINLEDGER_LOG_FORMAT").is_ok_and(|v| v == "pretty");
    let _ = if pretty {
        builder.try_init()
    } else {
        builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
    };
}
