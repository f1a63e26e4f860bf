//! `POST /transcribe` — multipart proxy to the transcription service.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::api_error;
use crate::state::AppState;

pub async fn transcribe(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let transcription = match &state.transcription {
        Some(client) => client.clone(),
        None => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "API key not configured"),
    };

    let mut audio: Option<(Vec<u8>, String, String)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return api_error(StatusCode::BAD_REQUEST, format!("invalid multipart body: {e}"))
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("audio.webm").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("audio/webm")
            .to_string();
        match field.bytes().await {
            Ok(bytes) => audio = Some((bytes.to_vec(), filename, content_type)),
            Err(e) => {
                return api_error(StatusCode::BAD_REQUEST, format!("reading audio field: {e}"))
            }
        }
    }

    let Some((bytes, filename, content_type)) = audio else {
        return api_error(StatusCode::BAD_REQUEST, "No audio file provided");
    };

    match transcription.transcribe(bytes, filename, &content_type).await {
        Ok(result) => Json(serde_json::json!({
            "words": result.words,
            "fullText": result.full_text,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "transcription failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Transcription failed: {e}"),
            )
        }
    }
}
