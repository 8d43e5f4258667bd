use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use partsledger_core::DomainError;
use partsledger_infra::{LedgerError, StoreError};

/// Map a coordinator failure to a status and a stable machine code.
pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let status = match &err {
        LedgerError::Domain(e) => match e {
            DomainError::ProductNotFound(_) | DomainError::SaleNotFound(_) | DomainError::SaleItemNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DomainError::InsufficientStock { .. }
            | DomainError::SerialNotAvailable { .. }
            | DomainError::DuplicateSerial(_)
            | DomainError::ProductInUse { .. }
            | DomainError::InvalidStateTransition(_) => StatusCode::CONFLICT,
            DomainError::SerialMismatch(_) | DomainError::OverReturn { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::InvalidQuantity(_) | DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        },
        LedgerError::Store(StoreError::Contention(_)) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Store(e) => {
            tracing::error!(error = %e, "ledger store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, err.code(), err.to_string())
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
    use partsledger_core::ProductId;

    use super::*;

    #[test]
    fn domain_errors_map_to_documented_statuses() {
        let cases = [
            (DomainError::ProductNotFound(ProductId::new()), StatusCode::NOT_FOUND),
            (
                DomainError::InsufficientStock {
                    product_id: ProductId::new(),
                    requested: 3,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (DomainError::serial_mismatch("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::DuplicateSerial("S-1".into()), StatusCode::CONFLICT),
            (DomainError::InvalidQuantity(0), StatusCode::BAD_REQUEST),
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err.into()).status(), status);
        }
    }

    #[test]
    fn contention_is_retryable_unavailability() {
        let res = ledger_error_to_response(StoreError::Contention("lock timeout".into()).into());
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
