pub mod health;
pub mod search;
pub mod token;
pub mod transcribe;
pub mod usage;
pub mod verify;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/token", get(token::issue_token))
        .route("/transcribe", post(transcribe::transcribe))
        .route("/knowledge/search", post(search::search))
        .route("/correction/verify", post(verify::verify))
        .route("/token-usage/:key", get(usage::get_usage))
        .route("/token-usage/:key/estimate", post(usage::apply_estimate))
        .route("/token-usage/:key/actual", post(usage::apply_actual))
        .route("/token-stats", get(usage::stats))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Like [`api_error`], with an extra `detail` field.
pub(crate) fn api_error_detail(
    status: StatusCode,
    message: impl Into<String>,
    detail: impl Into<String>,
) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into(),
            "detail": detail.into(),
        })),
    )
        .into_response()
}
