use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use coinledger_core::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LedgerError::InsufficientFunds { needed, available } => json_error(
            StatusCode::BAD_REQUEST,
            "insufficient_funds",
            format!("need {needed} coins, available {available}"),
        ),
        LedgerError::NotFound { entity, id } => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{entity} not found: {id}"),
        ),
        LedgerError::InvalidState(msg) => json_error(StatusCode::CONFLICT, "invalid_state", msg),
        LedgerError::Contended { attempts } => json_error(
            StatusCode::CONFLICT,
            "contended",
            format!("update lost after {attempts} attempts, please retry"),
        ),
        LedgerError::InsufficientEscrow { needed, held } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_escrow",
            format!("need {needed} escrowed coins, held {held}"),
        ),
        LedgerError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_error_taxonomy() {
        let cases = [
            (LedgerError::validation("x"), StatusCode::BAD_REQUEST),
            (
                LedgerError::insufficient_funds(10, 5),
                StatusCode::BAD_REQUEST,
            ),
            (
                LedgerError::not_found("booking", "b-1"),
                StatusCode::NOT_FOUND,
            ),
            (LedgerError::invalid_state("x"), StatusCode::CONFLICT),
            (LedgerError::contended(5), StatusCode::CONFLICT),
            (
                LedgerError::insufficient_escrow(10, 5),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LedgerError::storage("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ledger_error_to_response(err).status(), expected);
        }
    }
}
