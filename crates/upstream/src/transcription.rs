//! Multipart audio transcription with word-level timestamps.

use serde::Deserialize;

use tinge_domain::error::Result;
use tinge_domain::utterance::{Transcription, WordTiming};

use crate::util::{from_reqwest, status_error};

#[derive(Debug, Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

/// Client for `POST {base}/audio/transcriptions`.
pub struct TranscriptionClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        // No explicit request timeout: long clips legitimately take a while.
        let client = reqwest::Client::builder().build().map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Transcribe one recorded payload, requesting word timestamps.
    pub async fn transcribe(
        &self,
        bytes: Vec<u8>,
        filename: String,
        content_type: &str,
    ) -> Result<Transcription> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let size = bytes.len();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(content_type)
            .map_err(from_reqwest)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        tracing::debug!(url = %url, bytes = size, "transcription request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let verbose: VerboseTranscription = resp.json().await.map_err(from_reqwest)?;
        Ok(Transcription {
            words: verbose
                .words
                .into_iter()
                .map(|w| WordTiming {
                    word: w.word,
                    start_sec: w.start,
                    end_sec: w.end,
                })
                .collect(),
            full_text: verbose.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_json_maps_to_word_timings() {
        let raw = r#"{
            "text": "hola mundo",
            "words": [
                { "word": "hola", "start": 0.0, "end": 0.42 },
                { "word": "mundo", "start": 0.5, "end": 0.9 }
            ]
        }"#;
        let verbose: VerboseTranscription = serde_json::from_str(raw).unwrap();
        assert_eq!(verbose.text, "hola mundo");
        assert_eq!(verbose.words.len(), 2);
        assert!((verbose.words[1].start - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_words_defaults_to_empty() {
        let verbose: VerboseTranscription = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert!(verbose.words.is_empty());
    }
}
