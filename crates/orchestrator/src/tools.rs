//! Function-call service: dispatches tool invocations from the model and
//! replies on the data channel.
//!
//! Every call, success or error, produces exactly one `function_call_output`
//! followed by one `response.create`. Concurrent tool calls run their HTTP
//! work concurrently, but replies are serialized on the channel.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use tinge_domain::correction::CorrectionType;
use tinge_domain::tool::{ToolCall, ToolDefinition};
use tinge_protocol::{ClientEvent, ConversationItem};

use crate::citations::{sources_from_search_result, CitationCoordinator};
use crate::corrections::{run_verification, CorrectionLog};
use crate::gateway::GatewayClient;
use crate::profile::{deep_merge, default_profile, touch_session, ProfileStore};
use crate::transport::DataChannel;
use crate::ui::{SearchTelemetry, UiEvent, UiSink};

/// The tool catalog advertised in the session update.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_user_profile".into(),
            description: "Fetch the learner's profile: mistake patterns, mastery status, \
                          interests, and learning preferences."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string", "description": "Learner identifier" }
                },
                "required": ["user_id"]
            }),
        },
        ToolDefinition {
            name: "update_user_profile".into(),
            description: "Merge updates into the learner's profile. List fields are \
                          unioned, scalar fields overwritten."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string", "description": "Learner identifier" },
                    "updates": { "type": "object", "description": "Partial profile to merge" }
                },
                "required": ["user_id", "updates"]
            }),
        },
        ToolDefinition {
            name: "search_knowledge".into(),
            description: "Search the knowledge base for facts to ground an answer. \
                          Cite results with their citation_index."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query_original": { "type": "string", "description": "The learner's question, verbatim" },
                    "query_en": { "type": "string", "description": "English translation of the query" },
                    "language": { "type": "string", "description": "Preferred result language" },
                    "top_k": { "type": "integer", "description": "How many results (1-10)" }
                },
                "required": ["query_original"]
            }),
        },
        ToolDefinition {
            name: "log_correction".into(),
            description: "Record a correction of a learner mistake for later review. \
                          Triggers asynchronous verification."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "original": { "type": "string", "description": "What the learner said" },
                    "corrected": { "type": "string", "description": "The corrected form" },
                    "correction_type": {
                        "type": "string",
                        "enum": ["grammar", "vocabulary", "pronunciation", "style_register"]
                    },
                    "learner_excerpt": { "type": "string" },
                    "assistant_excerpt": { "type": "string" }
                },
                "required": ["original", "corrected", "correction_type"]
            }),
        },
    ]
}

pub struct FunctionCallService {
    channel: Arc<dyn DataChannel>,
    gateway: Arc<GatewayClient>,
    profiles: Arc<dyn ProfileStore>,
    corrections: Arc<CorrectionLog>,
    citations: Arc<CitationCoordinator>,
    ui: UiSink,
    reply_lock: tokio::sync::Mutex<()>,
}

impl FunctionCallService {
    pub fn new(
        channel: Arc<dyn DataChannel>,
        gateway: Arc<GatewayClient>,
        profiles: Arc<dyn ProfileStore>,
        corrections: Arc<CorrectionLog>,
        citations: Arc<CitationCoordinator>,
        ui: UiSink,
    ) -> Self {
        Self {
            channel,
            gateway,
            profiles,
            corrections,
            citations,
            ui,
            reply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Handle one tool invocation end to end: dispatch, then reply.
    pub async fn handle(self: &Arc<Self>, call: ToolCall) {
        tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "tool call");
        let result = self.dispatch(&call).await;
        if let Err(e) = self.reply(&call.call_id, &result).await {
            tracing::warn!(error = %e, call_id = %call.call_id, "tool reply failed");
        }
    }

    async fn dispatch(self: &Arc<Self>, call: &ToolCall) -> Value {
        match call.tool_name.as_str() {
            "get_user_profile" => self.get_user_profile(&call.arguments).await,
            "update_user_profile" => self.update_user_profile(&call.arguments).await,
            "search_knowledge" => self.search_knowledge(&call.arguments).await,
            "log_correction" => self.log_correction(&call.arguments).await,
            other => json!({ "error": format!("Unknown function: {other}") }),
        }
    }

    /// One `function_call_output`, then one `response.create`, in that
    /// order, serialized across concurrent tool calls.
    async fn reply(&self, call_id: &str, result: &Value) -> tinge_domain::Result<()> {
        let _guard = self.reply_lock.lock().await;
        self.channel
            .send_event(&ClientEvent::ConversationItemCreate {
                item: ConversationItem::FunctionCallOutput {
                    call_id: call_id.to_string(),
                    output: result.to_string(),
                },
            })
            .await?;
        self.channel.send_event(&ClientEvent::ResponseCreate).await
    }

    // ── get_user_profile ─────────────────────────────────────────────

    async fn get_user_profile(&self, args: &Value) -> Value {
        let Some(user_id) = args.get("user_id").and_then(|v| v.as_str()) else {
            return json!({ "error": "user_id is required" });
        };
        let mut profile = match self.profiles.get(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => default_profile(user_id),
            Err(e) => return json!({ "error": format!("profile read failed: {e}") }),
        };
        touch_session(&mut profile);
        if let Err(e) = self.profiles.put(user_id, &profile).await {
            tracing::warn!(error = %e, "profile session stamp not persisted");
        }
        profile
    }

    // ── update_user_profile ──────────────────────────────────────────

    async fn update_user_profile(&self, args: &Value) -> Value {
        let Some(user_id) = args.get("user_id").and_then(|v| v.as_str()) else {
            return json!({ "error": "user_id is required" });
        };
        let Some(updates) = args.get("updates").filter(|u| u.is_object()) else {
            return json!({ "error": "updates must be an object" });
        };
        let mut profile = match self.profiles.get(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => default_profile(user_id),
            Err(e) => return json!({ "error": format!("profile read failed: {e}") }),
        };
        deep_merge(&mut profile, updates);
        match self.profiles.put(user_id, &profile).await {
            Ok(()) => profile,
            Err(e) => json!({ "error": format!("profile write failed: {e}") }),
        }
    }

    // ── search_knowledge ─────────────────────────────────────────────

    async fn search_knowledge(&self, args: &Value) -> Value {
        self.ui.emit(UiEvent::SearchStarted { args: args.clone() });
        self.citations.on_search_started();

        let started = Instant::now();
        match self.gateway.search(args).await {
            Ok(data) => {
                let sources = sources_from_search_result(&data);
                let result_count = sources.len();
                self.citations.on_search_result(sources);
                self.ui.emit(UiEvent::SearchResult {
                    data: Some(data.clone()),
                    telemetry: SearchTelemetry {
                        status: "ok",
                        result_count,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    },
                });
                data
            }
            Err(e) => {
                self.ui.emit(UiEvent::SearchResult {
                    data: None,
                    telemetry: SearchTelemetry {
                        status: "error",
                        result_count: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                });
                json!({ "error": format!("knowledge search failed: {e}") })
            }
        }
    }

    // ── log_correction ───────────────────────────────────────────────

    async fn log_correction(self: &Arc<Self>, args: &Value) -> Value {
        let required = |field: &str| {
            args.get(field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
        };
        let (Some(original), Some(corrected), Some(raw_type)) = (
            required("original"),
            required("corrected"),
            required("correction_type"),
        ) else {
            return json!({ "error": "original, corrected and correction_type are required" });
        };
        let Some(correction_type) = CorrectionType::parse(&raw_type) else {
            return json!({
                "error": format!(
                    "correction_type must be one of: {}",
                    CorrectionType::valid_values()
                )
            });
        };

        let record = self.corrections.detect(original, corrected, correction_type);
        self.ui.emit(UiEvent::CorrectionDetected {
            correction_id: record.id.clone(),
            record: record.clone(),
        });

        tokio::spawn(run_verification(
            self.corrections.clone(),
            self.gateway.clone(),
            self.ui.clone(),
            record.id.clone(),
        ));

        json!({ "status": "logged", "correction_id": record.id })
    }
}
