use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use branchpos_auth::AuthzError;
use branchpos_infra::command_dispatcher::DispatchError;
use branchpos_infra::inventory::StockError;
use branchpos_infra::reconciliation::ReconcileError;
use branchpos_infra::transfers::TransferError;

/// Handlers return the error response itself on the `Err` side.
pub type ApiResult = Result<Response, Response>;

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event no longer deserializes");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => {
            tracing::error!(error = %msg, "event publication failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "publish_error", msg)
        }
    }
}

pub fn reconcile_error_to_response(err: ReconcileError) -> Response {
    match err {
        ReconcileError::AccountNotUsable(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "account_not_usable", msg)
        }
        ReconcileError::Order(e) | ReconcileError::Account(e) => dispatch_error_to_response(e),
        err @ ReconcileError::CompensationFailed { .. } => {
            tracing::error!(error = %err, "payment left half-applied");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "compensation_failed", err.to_string())
        }
    }
}

pub fn stock_error_to_response(err: StockError) -> Response {
    match err {
        StockError::Document(e) | StockError::Catalog(e) => dispatch_error_to_response(e),
        err @ StockError::CompensationFailed { .. } => {
            tracing::error!(error = %err, "stock movement left half-applied");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "compensation_failed", err.to_string())
        }
    }
}

pub fn transfer_error_to_response(err: TransferError) -> Response {
    match err {
        TransferError::AccountNotUsable(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "account_not_usable", msg)
        }
        TransferError::Source(e) | TransferError::Destination(e) => dispatch_error_to_response(e),
        err @ TransferError::CompensationFailed { .. } => {
            tracing::error!(error = %err, "account transfer left half-applied");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "compensation_failed", err.to_string())
        }
    }
}

pub fn forbidden(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn not_found(what: &str) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
}

pub fn invalid_id(what: &str) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}"))
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
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
    fn dispatch_errors_map_to_status_codes() {
        let cases = [
            (DispatchError::Concurrency("stale".into()), StatusCode::CONFLICT),
            (DispatchError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (DispatchError::InvariantViolation("no".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (DispatchError::Unauthorized, StatusCode::FORBIDDEN),
            (DispatchError::NotFound, StatusCode::NOT_FOUND),
            (DispatchError::Publish("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(dispatch_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn unusable_account_is_unprocessable() {
        let res = reconcile_error_to_response(ReconcileError::AccountNotUsable("closed".into()));
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn stock_and_transfer_errors_keep_the_dispatch_status() {
        let res = stock_error_to_response(StockError::Catalog(DispatchError::InvariantViolation(
            "insufficient stock".into(),
        )));
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let res = stock_error_to_response(StockError::CompensationFailed {
            step: "goods receipt",
            cause: DispatchError::Concurrency("stale".into()),
            compensation: DispatchError::NotFound,
        });
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let res = transfer_error_to_response(TransferError::AccountNotUsable("closed".into()));
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let res = transfer_error_to_response(TransferError::Source(DispatchError::Validation("same".into())));
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
