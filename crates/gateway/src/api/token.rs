//! `GET /token` — mint an ephemeral realtime credential and register it in
//! the usage ledger.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use tinge_domain::error::Error;

use super::api_error;
use crate::state::AppState;

pub async fn issue_token(State(state): State<AppState>) -> Response {
    let realtime = match &state.realtime {
        Some(client) => client,
        None => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "API key not configured"),
    };

    let minted = match realtime.mint().await {
        Ok(minted) => minted,
        Err(e) => return map_mint_error(e),
    };

    let usage = state.ledger.initialize(&minted.client_secret, None);
    tracing::info!("session credential issued");

    let mut body = minted.raw;
    body["tokenUsage"] = match serde_json::to_value(&usage) {
        Ok(value) => value,
        Err(e) => {
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("serializing token usage: {e}"),
            )
        }
    };
    Json(body).into_response()
}

fn map_mint_error(error: Error) -> Response {
    match error {
        Error::UpstreamStatus { status: 401, .. } => {
            api_error(StatusCode::UNAUTHORIZED, "Invalid API key")
        }
        Error::UpstreamStatus { status: 403, .. } => api_error(
            StatusCode::FORBIDDEN,
            "API key does not have access to the realtime API",
        ),
        Error::UpstreamStatus { status: 404, .. } => {
            api_error(StatusCode::NOT_FOUND, "Realtime endpoint not found")
        }
        Error::UpstreamStatus { status: 429, .. } => {
            api_error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
        }
        Error::InvalidResponse(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid response format from upstream",
        ),
        other => {
            tracing::error!(error = %other, "session minting failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to mint session token: {other}"),
            )
        }
    }
}
