//! Data-channel protocol: the JSON event stream exchanged with the upstream
//! realtime conversation service.
//!
//! Outgoing traffic is the small closed set in [`ClientEvent`]; incoming
//! frames parse into [`ServerEvent`] via [`IncomingEvent::parse`], which
//! passes unknown event kinds through untouched for the UI layer instead of
//! failing on them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tinge_domain::tool::ToolDefinition;
use tinge_domain::usage::UsageReport;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outgoing events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversation role for outgoing message items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Content part of an outgoing message item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

/// Item payload of a `conversation.item.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "message")]
    Message { role: Role, content: Vec<ContentPart> },

    /// Result of a tool invocation, fed back to the model.
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

impl ConversationItem {
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

/// Tool entry in the realtime session update (flattened function form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDefinition> for SessionTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            kind: "function".into(),
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        }
    }
}

/// Input transcription settings advertised in the session update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Body of a `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<SessionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
}

/// Events the orchestrator sends on the data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPatch },

    /// One captured microphone frame, base64-encoded PCM.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incoming events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Envelope carrying optional usage in a `response.done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub usage: Option<UsageReport>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Envelope carrying optional usage in a `session.updated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionEnvelope {
    #[serde(default)]
    pub usage: Option<UsageReport>,
}

/// The closed set of event kinds the orchestrator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        transcript: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },

    #[serde(rename = "response.text.done")]
    TextDone { text: String },

    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        transcript: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        name: String,
        /// Serialized JSON arguments, exactly as emitted by the model.
        arguments: String,
        call_id: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseEnvelope,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionEnvelope,
    },
}

/// A parsed incoming frame: a known event, or an unknown kind carried
/// through verbatim.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Known(ServerEvent),
    Unknown { kind: String, payload: Value },
}

impl IncomingEvent {
    /// Parse one data-channel frame.
    ///
    /// Frames that are not JSON objects are an error; JSON objects whose
    /// `type` is outside the closed set become [`IncomingEvent::Unknown`].
    pub fn parse(raw: &str) -> tinge_domain::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(tinge_domain::Error::InvalidRequest(
                "data-channel frame is not a JSON object".into(),
            ));
        }
        Ok(Self::from_value(value))
    }

    /// Classify an already-parsed frame.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ServerEvent>(value.clone()) {
            Ok(event) => IncomingEvent::Known(event),
            Err(_) => {
                let kind = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("")
                    .to_string();
                IncomingEvent::Unknown {
                    kind,
                    payload: value,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::message(Role::System, "You are a tutor."),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "system");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");

        let reply = ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: "c".into(),
                output: r#"{"ok":true}"#.into(),
            },
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "c");

        let create = serde_json::to_value(ClientEvent::ResponseCreate).unwrap();
        assert_eq!(create["type"], "response.create");
    }

    #[test]
    fn session_update_carries_tools_and_transcription_model() {
        let def = ToolDefinition {
            name: "search_knowledge".into(),
            description: "Search the knowledge base.".into(),
            parameters: serde_json::json!({ "type": "object" }),
        };
        let event = ClientEvent::SessionUpdate {
            session: SessionPatch {
                instructions: None,
                tools: vec![SessionTool::from(&def)],
                input_audio_transcription: Some(InputAudioTranscription {
                    model: "whisper-1".into(),
                }),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["session"]["tools"][0]["type"], "function");
        assert_eq!(value["session"]["tools"][0]["name"], "search_knowledge");
        assert_eq!(
            value["session"]["input_audio_transcription"]["model"],
            "whisper-1"
        );
    }

    #[test]
    fn parses_known_events() {
        let raw = r#"{"type":"response.audio_transcript.delta","delta":"Hola","response_id":"r1"}"#;
        match IncomingEvent::parse(raw).unwrap() {
            IncomingEvent::Known(ServerEvent::AudioTranscriptDelta { delta, response_id }) => {
                assert_eq!(delta, "Hola");
                assert_eq!(response_id.as_deref(), Some("r1"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        let raw = r#"{"type":"response.function_call_arguments.done","name":"search_knowledge","arguments":"{\"query_original\":\"x\"}","call_id":"c9"}"#;
        match IncomingEvent::parse(raw).unwrap() {
            IncomingEvent::Known(ServerEvent::FunctionCallArgumentsDone {
                name, call_id, ..
            }) => {
                assert_eq!(name, "search_knowledge");
                assert_eq!(call_id, "c9");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn response_done_usage_is_optional() {
        let raw = r#"{"type":"response.done","response":{"status":"completed"}}"#;
        match IncomingEvent::parse(raw).unwrap() {
            IncomingEvent::Known(ServerEvent::ResponseDone { response }) => {
                assert!(response.usage.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        let raw = r#"{"type":"response.done","response":{"usage":{"input_tokens":10,"output_tokens":5,"total_tokens":15}}}"#;
        match IncomingEvent::parse(raw).unwrap() {
            IncomingEvent::Known(ServerEvent::ResponseDone { response }) => {
                assert_eq!(response.usage.unwrap().session_total(), 15);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_kinds_pass_through_untouched() {
        let raw = r#"{"type":"rate_limits.updated","rate_limits":[{"name":"tokens"}]}"#;
        match IncomingEvent::parse(raw).unwrap() {
            IncomingEvent::Unknown { kind, payload } => {
                assert_eq!(kind, "rate_limits.updated");
                assert_eq!(payload["rate_limits"][0]["name"], "tokens");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn non_object_frame_is_an_error() {
        assert!(IncomingEvent::parse("[1,2,3]").is_err());
        assert!(IncomingEvent::parse("not json").is_err());
    }
}
