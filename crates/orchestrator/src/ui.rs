//! Events the orchestrator emits to the UI layer.
//!
//! This is a stable in-process interface, not a wire format: the embedding
//! application consumes it from an unbounded channel and renders however it
//! likes. Unknown data-channel event kinds are forwarded here untouched.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use tinge_domain::correction::{CorrectionRecord, VerifiedCorrection};
use tinge_domain::utterance::{DeviceType, Speaker, UtteranceRecord};

use crate::citations::PanelSource;

/// Telemetry attached to every knowledge-search result event, success or
/// failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTelemetry {
    /// `"ok"` or `"error"`.
    pub status: &'static str,
    pub result_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UiEvent {
    #[serde(rename = "utterance.added")]
    UtteranceAdded {
        record: UtteranceRecord,
        interrupted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_type: Option<DeviceType>,
    },

    #[serde(rename = "transcript.word")]
    TranscriptWord {
        word: String,
        speaker: Speaker,
        device_type: DeviceType,
    },

    #[serde(rename = "assistant.transcript.delta")]
    AssistantTranscriptDelta {
        /// The turn's transcript so far, citation markers remapped.
        text: String,
        /// Lexical words completed by this delta.
        completed_words: Vec<String>,
    },

    #[serde(rename = "assistant.transcript.final")]
    AssistantTranscriptFinal { text: String },

    #[serde(rename = "assistant.interrupted")]
    AssistantInterrupted {
        #[serde(skip_serializing_if = "Option::is_none")]
        utterance_id: Option<String>,
    },

    #[serde(rename = "tool.search_knowledge.started")]
    SearchStarted { args: Value },

    #[serde(rename = "tool.search_knowledge.result")]
    SearchResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        telemetry: SearchTelemetry,
    },

    #[serde(rename = "tool.log_correction.detected")]
    CorrectionDetected {
        correction_id: String,
        record: CorrectionRecord,
    },

    #[serde(rename = "correction.verification.started")]
    VerificationStarted { correction_id: String },

    #[serde(rename = "correction.verification.succeeded")]
    VerificationSucceeded {
        correction_id: String,
        outcome: VerifiedCorrection,
    },

    #[serde(rename = "correction.verification.failed")]
    VerificationFailed {
        correction_id: String,
        error: String,
    },

    #[serde(rename = "source_panel.updated")]
    SourcePanelUpdated { sources: Vec<PanelSource> },

    #[serde(rename = "connection.state")]
    ConnectionState {
        connected: bool,
        connecting: bool,
        reconnect_required: bool,
    },

    /// Shown while the first press establishes the transport.
    #[serde(rename = "connection.feedback")]
    ConnectingFeedback { label: &'static str, duration_ms: u64 },

    #[serde(rename = "usage.limit_reached")]
    TokenLimitReached,

    /// Unknown data-channel event kinds pass through verbatim.
    #[serde(rename = "event.unknown")]
    UnknownEvent { kind: String, payload: Value },
}

/// Cloneable sender for UI events. Emission never fails: a closed receiver
/// just drops the event with a debug log.
#[derive(Clone)]
pub struct UiSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiSink {
    pub fn channel() -> (UiSink, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UiSink { tx }, rx)
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("UI receiver closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_dotted_kinds() {
        let event = UiEvent::AssistantInterrupted {
            utterance_id: Some("u1".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "assistant.interrupted");
        assert_eq!(value["utterance_id"], "u1");

        let event = UiEvent::SearchResult {
            data: None,
            telemetry: SearchTelemetry {
                status: "error",
                result_count: 0,
                duration_ms: 1234,
                error: Some("boom".into()),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool.search_knowledge.result");
        assert_eq!(value["telemetry"]["status"], "error");
        assert_eq!(value["telemetry"]["durationMs"], 1234);
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (sink, rx) = UiSink::channel();
        drop(rx);
        sink.emit(UiEvent::TokenLimitReached);
    }
}
