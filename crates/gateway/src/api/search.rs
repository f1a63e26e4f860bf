//! `POST /knowledge/search` — validated, clamped proxy to the retrieval
//! service with a bounded timeout.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use std::time::Instant;

use tinge_domain::error::Error;
use tinge_upstream::SearchRequest;

use super::{api_error, api_error_detail};
use crate::state::AppState;

const TOP_K_DEFAULT: u32 = 5;
const TOP_K_MIN: u32 = 1;
const TOP_K_MAX: u32 = 10;

/// Validate and normalize the incoming body into a [`SearchRequest`].
fn normalize(body: &Value) -> Result<SearchRequest, String> {
    let query_original = match body.get("query_original").and_then(|v| v.as_str()) {
        Some(q) if !q.trim().is_empty() => q.trim().to_string(),
        _ => return Err("query_original is required and must be a non-empty string".into()),
    };
    let query_en = body
        .get("query_en")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .unwrap_or_else(|| query_original.clone());
    let language = body
        .get("language")
        .and_then(|v| v.as_str())
        .filter(|l| !l.trim().is_empty())
        .unwrap_or("en")
        .to_string();
    let top_k = body
        .get("top_k")
        .and_then(|v| v.as_u64())
        .map(|k| (k as u32).clamp(TOP_K_MIN, TOP_K_MAX))
        .unwrap_or(TOP_K_DEFAULT);

    Ok(SearchRequest {
        query_original,
        query_en,
        language,
        top_k,
    })
}

pub async fn search(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let request = match normalize(&body) {
        Ok(request) => request,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, message),
    };

    let client = match &state.search {
        Some(client) => client.clone(),
        None => {
            return api_error_detail(
                StatusCode::BAD_GATEWAY,
                "Knowledge search failed",
                "retrieval service is not configured",
            )
        }
    };

    let started = Instant::now();
    match client.search(&request).await {
        Ok(result) => {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                top_k = request.top_k,
                "knowledge search ok"
            );
            Json(result).into_response()
        }
        Err(Error::Timeout(_)) => api_error_detail(
            StatusCode::GATEWAY_TIMEOUT,
            "Knowledge search timed out",
            format!("no response within {}ms", client.timeout_ms()),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "knowledge search failed");
            api_error_detail(StatusCode::BAD_GATEWAY, "Knowledge search failed", e.to_string())
        }
    }
}
