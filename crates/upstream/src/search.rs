//! Knowledge-search proxy client with an abortable timeout.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use tinge_domain::error::Result;

use crate::util::{from_reqwest, status_error};

/// Normalized search request forwarded to the retrieval service.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query_original: String,
    pub query_en: String,
    pub language: String,
    pub top_k: u32,
}

/// Client for `POST {base}/search`.
pub struct KnowledgeSearchClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl KnowledgeSearchClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Forward a search. The result body is passed through untouched.
    ///
    /// A timeout surfaces as [`tinge_domain::Error::Timeout`] so the gateway
    /// can answer 504; other network failures become `Error::Http` (502).
    pub async fn search(&self, request: &SearchRequest) -> Result<Value> {
        let url = format!("{}/search", self.base_url);
        tracing::debug!(
            url = %url,
            top_k = request.top_k,
            language = %request.language,
            "knowledge search request"
        );

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        resp.json().await.map_err(from_reqwest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_flat() {
        let request = SearchRequest {
            query_original: "¿Qué es Barcelona?".into(),
            query_en: "What is Barcelona?".into(),
            language: "en".into(),
            top_k: 5,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["query_original"], "¿Qué es Barcelona?");
        assert_eq!(value["top_k"], 5);
    }

    #[tokio::test]
    async fn unreachable_host_is_not_a_timeout() {
        // Connection refused must map to Http (502 at the gateway), not
        // Timeout (504).
        let client = KnowledgeSearchClient::new(
            "http://127.0.0.1:1", // reserved port, nothing listens
            Duration::from_secs(5),
        )
        .unwrap();
        let request = SearchRequest {
            query_original: "x".into(),
            query_en: "x".into(),
            language: "en".into(),
            top_k: 1,
        };
        match client.search(&request).await {
            Err(tinge_domain::Error::Http(_)) => {}
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
