use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use commandrelay_infra::{AcknowledgeError, PendingStoreError};

pub fn acknowledge_error_to_response(err: AcknowledgeError) -> axum::response::Response {
    match err {
        AcknowledgeError::EmptyBatch => {
            json_error(StatusCode::BAD_REQUEST, "empty_batch", "ids must not be empty")
        }
        AcknowledgeError::Forbidden(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        AcknowledgeError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: PendingStoreError) -> axum::response::Response {
    tracing::error!(error = %err, "pending store failure");
    match err {
        PendingStoreError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            other.to_string(),
        ),
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
