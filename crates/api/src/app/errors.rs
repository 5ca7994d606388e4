use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use ezbooks_ai::AiError;
use ezbooks_infra::BookkeepingError;
use ezbooks_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        // Only surfaces once retries are exhausted.
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "concurrent_modification", msg),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => json_error(StatusCode::BAD_REQUEST, "invariant_violation", msg),
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => internal("deserialize_error", msg),
        DispatchError::Store(e) => internal("store_error", e.to_string()),
        DispatchError::Publish(msg) => internal("publish_error", msg),
    }
}

pub fn bookkeeping_error_to_response(err: BookkeepingError) -> Response {
    match err {
        BookkeepingError::Dispatch(e) => dispatch_error_to_response(e),
        BookkeepingError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        BookkeepingError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        BookkeepingError::Suggestion(AiError::InvalidInput(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "suggestion_unavailable", msg)
        }
        BookkeepingError::Suggestion(e) => internal("suggestion_failed", e.to_string()),
        BookkeepingError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        BookkeepingError::Internal(msg) => internal("internal_error", msg),
    }
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

fn internal(code: &'static str, message: String) -> Response {
    tracing::error!(error = code, message = %message, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn not_found(what: &str) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
}

/// Parse a path or body id, answering 400 on garbage.
pub fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("{what} must be a UUID"),
        )
    })
}
