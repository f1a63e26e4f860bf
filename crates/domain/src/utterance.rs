//! Utterance records and the transcript-binding vocabulary.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Ai => "ai",
        }
    }
}

/// Device class the client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
        }
    }
}

/// Word-level timing from the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub word: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

/// Result of one transcription round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub words: Vec<WordTiming>,
    pub full_text: String,
}

/// Recorded audio for one capture segment.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub duration_secs: f64,
    pub mime_type: String,
}

/// One finished utterance, user or assistant.
///
/// Created when a capture segment finishes; mutated exactly once by the
/// transcription round trip that attaches `word_timings` and `full_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceRecord {
    pub id: String,
    pub speaker: Speaker,
    pub timestamp_ms: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_timings: Option<Vec<WordTiming>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

impl UtteranceRecord {
    /// New record stamped with the current wall clock.
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            speaker,
            timestamp_ms: Utc::now().timestamp_millis(),
            text: text.into(),
            audio_ref: None,
            word_timings: None,
            full_text: None,
        }
    }

    /// Attach a transcription result. Later calls are no-ops: the binding
    /// happens exactly once per record.
    pub fn bind_transcription(&mut self, transcription: Transcription) -> bool {
        if self.word_timings.is_some() {
            return false;
        }
        self.word_timings = Some(transcription.words);
        self.full_text = Some(if transcription.full_text.is_empty() {
            self.text.clone()
        } else {
            transcription.full_text
        });
        true
    }

    /// Fallback binding when the transcription service failed: keep the
    /// utterance with empty timings rather than dropping it.
    pub fn bind_empty_transcription(&mut self) -> bool {
        self.bind_transcription(Transcription {
            words: Vec::new(),
            full_text: self.text.clone(),
        })
    }
}
