//! Data-channel event router.
//!
//! Parses incoming frames, consults the assistant-turn gate first, then
//! dispatches to capture, tools, usage accounting, citations and the UI.
//! Unknown event kinds are forwarded to the UI untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tinge_domain::tool::ToolCall;
use tinge_domain::utterance::Speaker;
use tinge_protocol::{IncomingEvent, ServerEvent};

use crate::bubbles::BubbleManager;
use crate::capture::CaptureController;
use crate::citations::CitationCoordinator;
use crate::tools::FunctionCallService;
use crate::turn::{TurnGate, TurnPhase};
use crate::ui::{UiEvent, UiSink};
use crate::usage_tracker::UsageTracker;

pub struct EventRouter {
    gate: Mutex<TurnGate>,
    capture: Arc<CaptureController>,
    tools: Arc<FunctionCallService>,
    usage: Arc<UsageTracker>,
    citations: Arc<CitationCoordinator>,
    bubbles: Arc<Mutex<BubbleManager>>,
    ui: UiSink,
    drain_timeout: Duration,
}

impl EventRouter {
    pub fn new(
        capture: Arc<CaptureController>,
        tools: Arc<FunctionCallService>,
        usage: Arc<UsageTracker>,
        citations: Arc<CitationCoordinator>,
        bubbles: Arc<Mutex<BubbleManager>>,
        ui: UiSink,
        drain_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            gate: Mutex::new(TurnGate::new()),
            capture,
            tools,
            usage,
            citations,
            bubbles,
            ui,
            drain_timeout,
        })
    }

    pub fn turn_phase(&self) -> TurnPhase {
        self.gate.lock().phase()
    }

    /// Entry point for one raw data-channel frame.
    pub async fn handle_frame(self: &Arc<Self>, raw: &str) {
        match IncomingEvent::parse(raw) {
            Ok(IncomingEvent::Known(event)) => self.dispatch(event).await,
            Ok(IncomingEvent::Unknown { kind, payload }) => {
                self.ui.emit(UiEvent::UnknownEvent { kind, payload });
            }
            Err(e) => tracing::warn!(error = %e, "undecodable data-channel frame"),
        }
    }

    async fn dispatch(self: &Arc<Self>, event: ServerEvent) {
        let now = Instant::now();
        match event {
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.on_assistant_delta(&delta, now).await;
            }

            ServerEvent::TextDelta { delta } => {
                // Text deltas feed the bubble but never the audio capture.
                if !self.gate.lock().allows_assistant_events() {
                    return;
                }
                let completed = self.bubbles.lock().append_delta(Speaker::Ai, &delta, now);
                let text = self.citations.on_streaming_delta(&delta);
                self.ui.emit(UiEvent::AssistantTranscriptDelta {
                    text,
                    completed_words: completed,
                });
            }

            ServerEvent::AudioTranscriptDone { transcript, .. }
            | ServerEvent::TextDone { text: transcript } => {
                if !self.gate.lock().allows_assistant_events() {
                    return;
                }
                let final_text = transcript.trim().to_string();
                let committed = self.citations.commit(&final_text);
                self.gate.lock().set_transcript(committed.text.clone());
                self.bubbles.lock().finalize(Speaker::Ai);
                self.ui.emit(UiEvent::AssistantTranscriptFinal {
                    text: committed.text,
                });
            }

            ServerEvent::OutputAudioBufferStarted { .. } => {
                {
                    let mut gate = self.gate.lock();
                    if !gate.allows_assistant_events() {
                        return;
                    }
                    gate.begin_speaking(now);
                }
                self.ensure_ai_capture().await;
            }

            ServerEvent::OutputAudioBufferStopped { .. } => {
                let buffers = {
                    let mut gate = self.gate.lock();
                    if gate.phase() == TurnPhase::Interrupted {
                        // Drain signal: consumed, nothing surfaces.
                        gate.on_drain_signal();
                        return;
                    }
                    gate.end_speaking()
                };
                if let Some(buffers) = buffers {
                    self.capture
                        .finalize_ai(&buffers.transcript, false, None)
                        .await;
                }
            }

            ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
                // Passes through even while interrupted.
                self.usage.track_text(&transcript);
                self.capture
                    .on_user_transcription_completed(&transcript)
                    .await;
            }

            ServerEvent::FunctionCallArgumentsDone {
                name,
                arguments,
                call_id,
            } => {
                let parsed = serde_json::from_str(&arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));
                let call = ToolCall {
                    call_id,
                    tool_name: name,
                    arguments: parsed,
                };
                let tools = self.tools.clone();
                // Tool HTTP work runs concurrently; replies serialize in
                // the service itself.
                tokio::spawn(async move { tools.handle(call).await });
            }

            ServerEvent::ResponseDone { response } => {
                self.gate.lock().on_drain_signal();
                if let Some(report) = response.usage {
                    let usage = self.usage.clone();
                    tokio::spawn(async move { usage.update_actual(&report).await });
                }
            }

            ServerEvent::SessionUpdated { session } => {
                if let Some(report) = session.usage {
                    let usage = self.usage.clone();
                    tokio::spawn(async move { usage.update_actual(&report).await });
                }
            }
        }
    }

    async fn on_assistant_delta(self: &Arc<Self>, delta: &str, now: Instant) {
        {
            let mut gate = self.gate.lock();
            if !gate.allows_assistant_events() {
                return;
            }
            gate.begin_speaking(now);
            gate.push_delta(delta, now);
        }
        self.ensure_ai_capture().await;

        let text = self.citations.on_streaming_delta(delta);
        let completed = self.bubbles.lock().append_delta(Speaker::Ai, delta, now);
        self.ui.emit(UiEvent::AssistantTranscriptDelta {
            text,
            completed_words: completed,
        });
        self.usage.track_text(delta);
    }

    async fn ensure_ai_capture(&self) {
        if let Err(e) = self.capture.start_ai().await {
            tracing::warn!(error = %e, "assistant capture start failed");
        }
    }

    /// User barge-in: cancel the speaking turn, finalize any in-progress
    /// recording as interrupted, and start the drain timer.
    pub async fn interrupt(self: &Arc<Self>, utterance_id: Option<String>) {
        let transition = {
            let mut gate = self.gate.lock();
            gate.interrupt(Instant::now(), self.drain_timeout)
        };
        let Some(transition) = transition else {
            return;
        };

        self.ui.emit(UiEvent::AssistantInterrupted {
            utterance_id: utterance_id.clone(),
        });

        if self.capture.ai_active().await {
            self.capture
                .finalize_ai(&transition.buffers.transcript, true, utterance_id)
                .await;
        }

        let router = self.clone();
        let generation = transition.drain_generation;
        let timeout = self.drain_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            router.drain_elapsed(generation);
        });
    }

    /// The drain window elapsed; stale generations are ignored.
    pub fn drain_elapsed(&self, generation: u64) -> bool {
        let mut gate = self.gate.lock();
        let elapsed = gate.on_drain_elapsed(generation);
        if elapsed {
            tracing::debug!("assistant drain window elapsed");
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::SourceRegistry;
    use crate::corrections::CorrectionLog;
    use crate::gateway::GatewayClient;
    use crate::profile::InMemoryProfileStore;
    use crate::testing::{FakeRecorder, MemoryUtteranceStore, RecordingChannel};
    use tinge_domain::utterance::DeviceType;

    struct Fixture {
        router: Arc<EventRouter>,
        channel: Arc<RecordingChannel>,
        store: Arc<MemoryUtteranceStore>,
        rx: tokio::sync::mpsc::UnboundedReceiver<UiEvent>,
    }

    fn fixture() -> Fixture {
        let (ui, rx) = UiSink::channel();
        let gateway = Arc::new(GatewayClient::new("http://127.0.0.1:1").unwrap());
        let store = Arc::new(MemoryUtteranceStore::default());
        let capture = CaptureController::new(
            Arc::new(FakeRecorder),
            store.clone(),
            gateway.clone(),
            ui.clone(),
            DeviceType::Desktop,
        );
        let registry = Arc::new(SourceRegistry::new());
        let citations = Arc::new(CitationCoordinator::new(registry, ui.clone()));
        let channel = Arc::new(RecordingChannel::default());
        let tools = Arc::new(FunctionCallService::new(
            channel.clone(),
            gateway.clone(),
            Arc::new(InMemoryProfileStore::default()),
            Arc::new(CorrectionLog::new()),
            citations.clone(),
            ui.clone(),
        ));
        let usage = UsageTracker::new(gateway, Duration::from_millis(200));
        let bubbles = Arc::new(Mutex::new(BubbleManager::new(
            DeviceType::Desktop,
            Duration::from_millis(500),
        )));
        let router = EventRouter::new(
            capture,
            tools,
            usage,
            citations,
            bubbles,
            ui,
            Duration::from_secs(4),
        );
        Fixture {
            router,
            channel,
            store,
            rx,
        }
    }

    fn delta_frame(text: &str) -> String {
        serde_json::json!({
            "type": "response.audio_transcript.delta",
            "delta": text
        })
        .to_string()
    }

    fn drain_ui(rx: &mut tokio::sync::mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn deltas_start_the_turn_and_reach_the_ui() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("Hola ")).await;
        f.router.handle_frame(&delta_frame("mundo.")).await;

        assert_eq!(f.router.turn_phase(), TurnPhase::Speaking);
        let events = drain_ui(&mut f.rx);
        let deltas: Vec<&UiEvent> = events
            .iter()
            .filter(|e| matches!(e, UiEvent::AssistantTranscriptDelta { .. }))
            .collect();
        assert_eq!(deltas.len(), 2);
        match deltas[1] {
            UiEvent::AssistantTranscriptDelta { text, .. } => {
                assert_eq!(text, "Hola mundo.");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn interrupt_drops_stale_deltas_until_drain_signal() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("First answer.")).await;
        f.router.interrupt(Some("utt-1".into())).await;
        assert_eq!(f.router.turn_phase(), TurnPhase::Interrupted);
        drain_ui(&mut f.rx);

        // Stale tail is dropped entirely.
        f.router.handle_frame(&delta_frame(" stale tail")).await;
        assert!(drain_ui(&mut f.rx)
            .iter()
            .all(|e| !matches!(e, UiEvent::AssistantTranscriptDelta { .. })));

        // Drain signal returns to idle; next delta opens a fresh turn.
        f.router
            .handle_frame(r#"{"type":"output_audio_buffer.stopped"}"#)
            .await;
        assert_eq!(f.router.turn_phase(), TurnPhase::Idle);

        f.router.handle_frame(&delta_frame("Second answer.")).await;
        let events = drain_ui(&mut f.rx);
        match events
            .iter()
            .find(|e| matches!(e, UiEvent::AssistantTranscriptDelta { .. }))
            .unwrap()
        {
            UiEvent::AssistantTranscriptDelta { text, .. } => {
                assert_eq!(text, "Second answer.");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn interrupt_emits_interrupted_utterance() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("Cut short")).await;
        f.router.interrupt(Some("utt-7".into())).await;

        let events = drain_ui(&mut f.rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::AssistantInterrupted { utterance_id } if utterance_id.as_deref() == Some("utt-7"))));
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::UtteranceAdded { interrupted: true, record, .. } if record.id == "utt-7"
        )));
        assert_eq!(f.store.saved.lock().len(), 1);
    }

    #[tokio::test]
    async fn interrupt_without_recording_emits_no_utterance() {
        let mut f = fixture();
        // No turn running: interrupt is a pure state no-op.
        f.router.interrupt(None).await;
        assert_eq!(f.router.turn_phase(), TurnPhase::Idle);
        assert!(drain_ui(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn buffer_stop_finalizes_the_turn() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("Una respuesta.")).await;
        f.router
            .handle_frame(r#"{"type":"output_audio_buffer.stopped"}"#)
            .await;

        assert_eq!(f.router.turn_phase(), TurnPhase::Idle);
        let events = drain_ui(&mut f.rx);
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::UtteranceAdded { interrupted: false, record, .. } if record.text == "Una respuesta."
        )));
        assert_eq!(f.store.saved.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_call_replies_on_the_channel() {
        let mut f = fixture();
        f.router
            .handle_frame(
                r#"{"type":"response.function_call_arguments.done","name":"unknown_tool","arguments":"{}","call_id":"c"}"#,
            )
            .await;
        // The tool task runs on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let kinds = f.channel.kinds();
        assert_eq!(kinds, vec!["conversation.item.create", "response.create"]);
        drain_ui(&mut f.rx);
    }

    #[tokio::test]
    async fn unknown_event_kinds_pass_through_to_ui() {
        let mut f = fixture();
        f.router
            .handle_frame(r#"{"type":"rate_limits.updated","rate_limits":[]}"#)
            .await;
        let events = drain_ui(&mut f.rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::UnknownEvent { kind, .. } if kind == "rate_limits.updated")));
    }

    #[tokio::test]
    async fn drain_timer_is_ignored_after_terminal_event() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("texto")).await;
        f.router.interrupt(None).await;
        f.router
            .handle_frame(r#"{"type":"response.done","response":{}}"#)
            .await;
        assert_eq!(f.router.turn_phase(), TurnPhase::Idle);

        // A stale drain firing later must not flip state.
        f.router.handle_frame(&delta_frame("nuevo")).await;
        assert!(!f.router.drain_elapsed(1));
        assert_eq!(f.router.turn_phase(), TurnPhase::Speaking);
        drain_ui(&mut f.rx);
    }

    #[tokio::test]
    async fn user_transcription_passes_during_interrupt() {
        let mut f = fixture();
        f.router.handle_frame(&delta_frame("hablando")).await;
        f.router.interrupt(None).await;
        drain_ui(&mut f.rx);

        f.router
            .handle_frame(
                r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"una pregunta"}"#,
            )
            .await;
        let events = drain_ui(&mut f.rx);
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::UtteranceAdded { record, .. } if record.text == "una pregunta"
        )));
    }
}
