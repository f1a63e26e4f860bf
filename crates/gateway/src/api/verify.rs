//! `POST /correction/verify` — strict-JSON verification proxy.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use tinge_domain::correction::CorrectionType;
use tinge_domain::error::Error;
use tinge_upstream::VerifyRequest;

use super::{api_error, api_error_detail};
use crate::state::AppState;

fn validate(body: &Value) -> Result<(VerifyRequest, Option<String>), String> {
    let required_str = |field: &str| -> Result<String, String> {
        match body.get(field).and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            _ => Err(format!("{field} is required and must be a non-empty string")),
        }
    };

    let original = required_str("original")?;
    let corrected = required_str("corrected")?;
    let raw_type = required_str("correction_type")?;
    let correction_type = CorrectionType::parse(&raw_type).ok_or_else(|| {
        format!(
            "correction_type must be one of: {}",
            CorrectionType::valid_values()
        )
    })?;

    let opt_str = |field: &str| {
        body.get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
    };

    Ok((
        VerifyRequest {
            original,
            corrected,
            correction_type,
            learner_level: opt_str("learner_level"),
            conversation_context: opt_str("conversation_context"),
        },
        opt_str("correction_id"),
    ))
}

pub async fn verify(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let (request, correction_id) = match validate(&body) {
        Ok(parsed) => parsed,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, message),
    };

    let client = match &state.verify {
        Some(client) => client.clone(),
        None => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "API key not configured"),
    };

    match client.verify(&request).await {
        Ok(outcome) => Json(serde_json::json!({
            "correction_id": correction_id,
            "mistake": outcome.mistake,
            "correction": outcome.correction,
            "rule": outcome.rule,
            "category": outcome.category,
            "confidence": outcome.confidence,
            "is_ambiguous": outcome.is_ambiguous,
            "verified_at": Utc::now().to_rfc3339(),
            "model": client.model(),
        }))
        .into_response(),
        Err(Error::Timeout(_)) => api_error(
            StatusCode::GATEWAY_TIMEOUT,
            "Correction verification timed out",
        ),
        Err(Error::UpstreamStatus { status: 429, .. }) => {
            api_error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
        }
        Err(e) => {
            tracing::warn!(error = %e, "correction verification failed");
            api_error_detail(
                StatusCode::BAD_GATEWAY,
                "Correction verification failed",
                e.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_all_mandatory_fields() {
        assert!(validate(&serde_json::json!({})).is_err());
        assert!(validate(&serde_json::json!({
            "original": "yo fue",
            "corrected": "yo fui"
        }))
        .is_err());
        assert!(validate(&serde_json::json!({
            "original": "",
            "corrected": "yo fui",
            "correction_type": "grammar"
        }))
        .is_err());
    }

    #[test]
    fn rejects_unknown_correction_type() {
        let err = validate(&serde_json::json!({
            "original": "yo fue",
            "corrected": "yo fui",
            "correction_type": "spelling"
        }))
        .unwrap_err();
        assert!(err.contains("grammar"));
        assert!(err.contains("style_register"));
    }

    #[test]
    fn accepts_full_request() {
        let (request, correction_id) = validate(&serde_json::json!({
            "correction_id": "corr-7",
            "original": "yo fue",
            "corrected": "yo fui",
            "correction_type": "grammar",
            "learner_level": "B1",
            "conversation_context": "talking about yesterday"
        }))
        .unwrap();
        assert_eq!(correction_id.as_deref(), Some("corr-7"));
        assert_eq!(request.correction_type, CorrectionType::Grammar);
        assert_eq!(request.learner_level.as_deref(), Some("B1"));
    }
}
