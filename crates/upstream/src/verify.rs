//! Correction verification via a strict-JSON completion call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use tinge_domain::correction::CorrectionType;
use tinge_domain::error::{Error, Result};

use crate::util::{from_reqwest, status_error};

/// Confidence below which a verification is considered ambiguous when the
/// model does not say so itself.
const AMBIGUITY_THRESHOLD: f64 = 0.6;

const SYSTEM_PROMPT: &str = "You are a language-teaching expert. Verify whether the \
proposed correction of the learner's utterance is right, name the underlying rule, \
and rate your confidence. Answer only with the requested JSON.";

/// Input to one verification call.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
    pub original: String,
    pub corrected: String,
    pub correction_type: CorrectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_context: Option<String>,
}

/// Parsed verification outcome, confidence clamped to `[0, 1]`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOutcome {
    pub mistake: String,
    pub correction: String,
    pub rule: String,
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub is_ambiguous: Option<bool>,
}

impl VerifyOutcome {
    /// Normalize a raw model answer: clamp confidence, default ambiguity
    /// from the confidence when the model left it out.
    fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.is_ambiguous.is_none() {
            self.is_ambiguous = Some(self.confidence < AMBIGUITY_THRESHOLD);
        }
        self
    }
}

/// Client for the completion endpoint used to verify corrections.
pub struct VerifyClient {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl VerifyClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn response_schema() -> Value {
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "correction_verification",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "mistake": { "type": "string" },
                        "correction": { "type": "string" },
                        "rule": { "type": "string" },
                        "category": { "type": "string" },
                        "confidence": { "type": "number" },
                        "is_ambiguous": { "type": "boolean" }
                    },
                    "required": [
                        "mistake", "correction", "rule",
                        "category", "confidence", "is_ambiguous"
                    ],
                    "additionalProperties": false
                }
            }
        })
    }

    /// Verify one correction. Timeouts surface as
    /// [`Error::Timeout`] (504 at the gateway); upstream 429 passes through
    /// as [`Error::UpstreamStatus`].
    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        let url = format!("{}/chat/completions", self.base_url);
        let user_payload = serde_json::to_string(request)?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_payload }
            ],
            "response_format": Self::response_schema(),
        });

        tracing::debug!(url = %url, correction_type = request.correction_type.as_str(), "verify request");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let body: Value = resp.json().await.map_err(from_reqwest)?;
        let content = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidResponse("no message content in completion".into()))?;

        let outcome: VerifyOutcome = serde_json::from_str(content)
            .map_err(|e| Error::InvalidResponse(format!("unparseable verification JSON: {e}")))?;
        Ok(outcome.normalized())
    }
}
