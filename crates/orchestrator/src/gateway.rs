//! Typed client for the backend gateway.
//!
//! Thin REST wrapper: each method maps one endpoint, 404 on the usage
//! endpoints surfaces as `None`/`UnknownCredential`, and transport errors
//! keep their timeout/other distinction for the callers' telemetry.

use serde_json::Value;

use tinge_domain::correction::{CorrectionRecord, VerifiedCorrection};
use tinge_domain::error::{Error, Result};
use tinge_domain::usage::{RequestDecision, UsageReport, UsageSnapshot, REASON_TOKEN_LIMIT};
use tinge_domain::utterance::{AudioPayload, Transcription};

pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// `GET /token` — mint an ephemeral session credential. Returns the
    /// full response object including the `tokenUsage` snapshot.
    pub async fn mint_session(&self) -> Result<Value> {
        let url = format!("{}/token", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message,
            });
        }
        resp.json().await.map_err(from_reqwest)
    }

    /// `GET /token-usage/:key` — `Ok(None)` when the key is unknown.
    pub async fn token_usage(&self, key: &str) -> Result<Option<UsageSnapshot>> {
        let url = format!("{}/token-usage/{key}", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(from_reqwest)?;
        match resp.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                Ok(Some(resp.json().await.map_err(from_reqwest)?))
            }
            s => Err(Error::UpstreamStatus {
                status: s,
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Limit check derived from the usage snapshot. Fails open: the core
    /// stays usable when usage telemetry is unreachable.
    pub async fn can_make_request(&self, key: &str) -> RequestDecision {
        match self.token_usage(key).await {
            Ok(Some(snapshot)) if snapshot.is_at_limit => {
                RequestDecision::denied(REASON_TOKEN_LIMIT)
            }
            Ok(_) => RequestDecision::allowed(),
            Err(e) => {
                tracing::warn!(error = %e, "limit check failed, allowing request");
                RequestDecision::allowed()
            }
        }
    }

    /// `POST /token-usage/:key/estimate`.
    pub async fn apply_estimate(
        &self,
        key: &str,
        text: &str,
        audio_duration_secs: f64,
    ) -> Result<UsageSnapshot> {
        let url = format!("{}/token-usage/{key}/estimate", self.base_url);
        let mut body = serde_json::Map::new();
        if !text.is_empty() {
            body.insert("text".into(), Value::String(text.to_string()));
        }
        if audio_duration_secs > 0.0 {
            body.insert(
                "audioDuration".into(),
                serde_json::json!(audio_duration_secs),
            );
        }
        self.post_usage(&url, Value::Object(body), key).await
    }

    /// `POST /token-usage/:key/actual`.
    pub async fn apply_actual(&self, key: &str, report: &UsageReport) -> Result<UsageSnapshot> {
        let url = format!("{}/token-usage/{key}/actual", self.base_url);
        let body = serde_json::json!({ "usageData": report });
        self.post_usage(&url, body, key).await
    }

    async fn post_usage(&self, url: &str, body: Value, key: &str) -> Result<UsageSnapshot> {
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        match resp.status().as_u16() {
            404 => Err(Error::UnknownCredential(key.to_string())),
            s if (200..300).contains(&s) => resp.json().await.map_err(from_reqwest),
            s => Err(Error::UpstreamStatus {
                status: s,
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// `POST /transcribe` — multipart upload of one recorded payload.
    pub async fn transcribe(&self, payload: &AudioPayload) -> Result<Transcription> {
        let url = format!("{}/transcribe", self.base_url);
        let part = reqwest::multipart::Part::bytes(payload.bytes.clone())
            .file_name("utterance.webm")
            .mime_str(&payload.mime_type)
            .map_err(from_reqwest)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json().await.map_err(from_reqwest)
    }

    /// `POST /knowledge/search` — body passed through as-is.
    pub async fn search(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/knowledge/search", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json().await.map_err(from_reqwest)
    }

    /// `POST /correction/verify` for one detected correction.
    pub async fn verify_correction(&self, record: &CorrectionRecord) -> Result<VerifiedCorrection> {
        let url = format!("{}/correction/verify", self.base_url);
        let body = serde_json::json!({
            "correction_id": record.id,
            "original": record.original,
            "corrected": record.corrected,
            "correction_type": record.correction_type,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        #[derive(serde::Deserialize)]
        struct VerifyWire {
            rule: String,
            confidence: f64,
            category: String,
            is_ambiguous: bool,
            verified_at: chrono::DateTime<chrono::Utc>,
            model: String,
        }
        let wire: VerifyWire = resp.json().await.map_err(from_reqwest)?;
        Ok(VerifiedCorrection {
            rule: wire.rule,
            confidence: wire.confidence,
            category: wire.category,
            is_ambiguous: wire.is_ambiguous,
            verified_at: wire.verified_at,
            model: wire.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = GatewayClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.base_url, "http://localhost:3000");
    }

    #[tokio::test]
    async fn limit_check_fails_open_on_network_error() {
        let client = GatewayClient::new("http://127.0.0.1:1").unwrap();
        let decision = client.can_make_request("ek_x").await;
        assert!(decision.allowed);
    }
}
