//! Token-usage endpoints: per-key snapshot, estimate, actual, and the
//! aggregate stats view.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tinge_domain::usage::{
    estimate_tokens_from_audio, estimate_tokens_from_text, pricing, UsageReport,
};

use super::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EstimateBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "audioDuration")]
    audio_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ActualBody {
    #[serde(rename = "usageData")]
    usage_data: UsageReport,
}

pub async fn get_usage(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.ledger.get(&key) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "Unknown token key"),
    }
}

pub async fn apply_estimate(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<EstimateBody>,
) -> Response {
    let text_tokens = body
        .text
        .as_deref()
        .map(estimate_tokens_from_text)
        .unwrap_or(0);
    let audio_tokens = body
        .audio_duration
        .map(estimate_tokens_from_audio)
        .unwrap_or(0);
    let cost = text_tokens as f64 * pricing::TEXT_INPUT + audio_tokens as f64 * pricing::AUDIO_INPUT;

    match state
        .ledger
        .apply_estimate(&key, text_tokens + audio_tokens, cost)
    {
        Some(snapshot) => Json(snapshot).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "Unknown token key"),
    }
}

pub async fn apply_actual(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ActualBody>,
) -> Response {
    match state.ledger.apply_actual(&key, &body.usage_data) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "Unknown token key"),
    }
}

pub async fn stats(State(state): State<AppState>) -> Response {
    Json(state.ledger.stats()).into_response()
}
