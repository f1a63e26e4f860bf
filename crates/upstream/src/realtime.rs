//! Ephemeral session credential minting against the realtime service.

use serde_json::Value;

use tinge_domain::error::{Error, Result};

use crate::util::{from_reqwest, status_error};

/// A freshly minted realtime session.
#[derive(Debug, Clone)]
pub struct MintedSession {
    /// The full upstream response object, returned to the frontend as-is
    /// (merged with the token-usage snapshot by the gateway).
    pub raw: Value,
    /// The ephemeral credential (`client_secret.value`).
    pub client_secret: String,
}

/// Client for `POST {base}/realtime/sessions`.
pub struct RealtimeSessionClient {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl RealtimeSessionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }

    /// Mint an ephemeral session credential.
    ///
    /// Non-success statuses surface as [`Error::UpstreamStatus`]; a success
    /// body without `client_secret.value` surfaces as
    /// [`Error::InvalidResponse`].
    pub async fn mint(&self) -> Result<MintedSession> {
        let url = format!("{}/realtime/sessions", self.base_url);
        tracing::debug!(url = %url, model = %self.model, "minting realtime session");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "voice": self.voice,
            }))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let raw: Value = resp.json().await.map_err(from_reqwest)?;
        let client_secret = raw
            .get("client_secret")
            .and_then(|cs| cs.get("value"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::InvalidResponse("session response missing client_secret.value".into())
            })?;

        tracing::info!("realtime session minted");
        Ok(MintedSession { raw, client_secret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_secret(raw: &Value) -> Option<&str> {
        raw.get("client_secret")
            .and_then(|cs| cs.get("value"))
            .and_then(|v| v.as_str())
    }

    #[test]
    fn secret_extraction_shape() {
        let ok = serde_json::json!({
            "client_secret": { "value": "ek_1", "expires_at": 1 },
            "model": "m",
            "voice": "v"
        });
        assert_eq!(extract_secret(&ok), Some("ek_1"));

        let missing = serde_json::json!({ "model": "m" });
        assert_eq!(extract_secret(&missing), None);

        let wrong_type = serde_json::json!({ "client_secret": { "value": 7 } });
        assert_eq!(extract_secret(&wrong_type), None);
    }

    #[test]
    fn base_url_is_normalized() {
        let client =
            RealtimeSessionClient::new("https://api.example.com/v1/", "sk", "m", "v").unwrap();
        assert_eq!(client.base_url, "https://api.example.com/v1");
    }
}
