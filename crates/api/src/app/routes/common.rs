//! Shared handler plumbing.

use axum::http::StatusCode;

use coinledger_core::LedgerResult;

use crate::app::errors;

/// Run a ledger operation off the async runtime. The engines are synchronous
/// and, on the Postgres backend, block on their own queries.
pub async fn run_blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    T: Send + 'static,
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(errors::ledger_error_to_response(err)),
        Err(join_err) => Err(errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            join_err.to_string(),
        )),
    }
}

/// Parse a path segment into a typed id, answering 400 on garbage.
pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
{
    raw.parse::<T>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what}: {raw}"),
        )
    })
}
