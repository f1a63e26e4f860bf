//! Session engine: owns every client-side component and wires the
//! transport, the PTT machine, the event router, and the backend gateway
//! into one running session.
//!
//! Construction is cheap and offline; the first PTT press mints the
//! ephemeral credential, connects the transport, and sends the bootstrap
//! (system prompt + session update with the tool catalog).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use tinge_domain::config::SessionConfig;
use tinge_domain::correction::UserFeedback;
use tinge_domain::error::{Error, Result};
use tinge_protocol::{
    ClientEvent, ConversationItem, InputAudioTranscription, Role, SessionPatch, SessionTool,
};

use crate::bubbles::BubbleManager;
use crate::capture::{CaptureController, Recorder, UtteranceStore};
use crate::citations::{CitationCoordinator, SessionScopedStorage, SourceRegistry};
use crate::corrections::CorrectionLog;
use crate::gateway::GatewayClient;
use crate::profile::ProfileStore;
use crate::ptt::{PttBackend, PttOrchestrator};
use crate::router::EventRouter;
use crate::tools::{tool_definitions, FunctionCallService};
use crate::transport::{
    ChannelHandle, DataChannel, DisconnectReason, TransportEvent, WsTransport,
};
use crate::ui::{UiEvent, UiSink};
use crate::usage_tracker::UsageTracker;

/// External collaborators injected by the embedding application.
pub struct SessionDeps {
    pub recorder: Arc<dyn Recorder>,
    pub store: Arc<dyn UtteranceStore>,
    pub profiles: Arc<dyn ProfileStore>,
    /// Opt-in persistence for the source registry.
    pub session_storage: Option<Arc<dyn SessionScopedStorage>>,
}

pub struct SessionEngine {
    config: SessionConfig,
    realtime_url: String,
    gateway: Arc<GatewayClient>,
    channel: Arc<ChannelHandle>,
    router: Arc<EventRouter>,
    ptt: std::sync::OnceLock<Arc<PttOrchestrator>>,
    usage: Arc<UsageTracker>,
    corrections: Arc<CorrectionLog>,
    capture: Arc<CaptureController>,
    credential: RwLock<Option<String>>,
    ui: UiSink,
}

impl SessionEngine {
    /// Build an engine and the UI event stream. Nothing is connected yet.
    pub fn new(
        config: SessionConfig,
        realtime_url: impl Into<String>,
        deps: SessionDeps,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<UiEvent>)> {
        let (ui, ui_rx) = UiSink::channel();
        let gateway = Arc::new(GatewayClient::new(&config.gateway_base_url)?);
        let channel = Arc::new(ChannelHandle::new());

        let registry = Arc::new(match deps.session_storage {
            Some(storage) => SourceRegistry::with_storage(storage),
            None => SourceRegistry::new(),
        });
        let citations = Arc::new(CitationCoordinator::new(registry, ui.clone()));
        let corrections = Arc::new(CorrectionLog::new());
        let capture = CaptureController::new(
            deps.recorder,
            deps.store,
            gateway.clone(),
            ui.clone(),
            config.device_type,
        );
        let usage = UsageTracker::new(
            gateway.clone(),
            Duration::from_millis(config.estimate_debounce_ms),
        );
        let tools = Arc::new(FunctionCallService::new(
            channel.clone() as Arc<dyn DataChannel>,
            gateway.clone(),
            deps.profiles,
            corrections.clone(),
            citations.clone(),
            ui.clone(),
        ));
        let bubbles = Arc::new(Mutex::new(BubbleManager::new(
            config.device_type,
            Duration::from_millis(config.bubble_cooldown_ms),
        )));
        let router = EventRouter::new(
            capture.clone(),
            tools,
            usage.clone(),
            citations,
            bubbles,
            ui.clone(),
            Duration::from_millis(config.drain_timeout_ms),
        );

        let engine = Arc::new(Self {
            config,
            realtime_url: realtime_url.into(),
            gateway,
            channel,
            router,
            ptt: std::sync::OnceLock::new(),
            usage,
            corrections,
            capture,
            credential: RwLock::new(None),
            ui,
        });

        let backend = Arc::new(EngineBackend {
            engine: Arc::downgrade(&engine),
        });
        let ptt = PttOrchestrator::new(backend, engine.ui.clone(), &engine.config);
        let _ = engine.ptt.set(ptt);

        Ok((engine, ui_rx))
    }

    pub fn ptt(&self) -> Arc<PttOrchestrator> {
        self.ptt.get().expect("wired at construction").clone()
    }

    pub fn corrections(&self) -> Arc<CorrectionLog> {
        self.corrections.clone()
    }

    pub fn credential(&self) -> Option<String> {
        self.credential.read().clone()
    }

    /// Record the learner's reaction to a surfaced correction.
    pub fn set_correction_feedback(&self, correction_id: &str, feedback: UserFeedback) -> bool {
        self.corrections
            .set_feedback(correction_id, feedback)
            .is_some()
    }

    /// Barge-in entry point for the embedding application.
    pub async fn interrupt(&self, utterance_id: Option<String>) {
        self.router.interrupt(utterance_id).await;
    }

    /// Mint a credential, connect the transport, and start the event pump.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        if self.channel.is_open() {
            return Ok(());
        }

        let minted = self.gateway.mint_session().await?;
        let credential = minted
            .get("client_secret")
            .and_then(|cs| cs.get("value"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::InvalidResponse("token response missing client_secret.value".into())
            })?;

        let (transport, events) = WsTransport::connect(&self.realtime_url, &credential).await?;
        self.channel.attach(transport);
        *self.credential.write() = Some(credential.clone());
        self.usage.set_credential(credential);

        let engine = self.clone();
        tokio::spawn(async move { engine.pump(events).await });
        Ok(())
    }

    /// Consume transport events until disconnection.
    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::ChannelOpen => {
                    if let Err(e) = self.send_bootstrap().await {
                        tracing::warn!(error = %e, "session bootstrap failed");
                    }
                }
                TransportEvent::Frame(raw) => {
                    self.router.handle_frame(&raw).await;
                }
                TransportEvent::Disconnected { reason } => {
                    tracing::info!(?reason, "transport disconnected");
                    self.usage.reset();
                    self.ui.emit(UiEvent::ConnectionState {
                        connected: false,
                        connecting: false,
                        reconnect_required: reason == DisconnectReason::Failed,
                    });
                    break;
                }
            }
        }
    }

    /// On data-channel open: send the system prompt, then the session
    /// update carrying the tool catalog and input transcription model.
    async fn send_bootstrap(&self) -> Result<()> {
        if !self.config.system_prompt.is_empty() {
            self.channel
                .send_event(&ClientEvent::ConversationItemCreate {
                    item: ConversationItem::message(Role::System, &self.config.system_prompt),
                })
                .await?;
        }
        let tools: Vec<SessionTool> = tool_definitions().iter().map(SessionTool::from).collect();
        self.channel
            .send_event(&ClientEvent::SessionUpdate {
                session: SessionPatch {
                    instructions: None,
                    tools,
                    input_audio_transcription: Some(InputAudioTranscription {
                        model: self.config.transcription_model.clone(),
                    }),
                },
            })
            .await
    }

    /// Tear the session down and release the transport.
    pub fn shutdown(&self) {
        if let Some(transport) = self.channel.transport() {
            transport.close();
        }
        self.usage.reset();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PTT backend wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct EngineBackend {
    engine: std::sync::Weak<SessionEngine>,
}

impl EngineBackend {
    fn engine(&self) -> Option<Arc<SessionEngine>> {
        self.engine.upgrade()
    }
}

#[async_trait::async_trait]
impl PttBackend for EngineBackend {
    async fn connect(&self) -> Result<()> {
        match self.engine() {
            Some(engine) => engine.establish().await,
            None => Err(Error::Transport("session engine is gone".into())),
        }
    }

    async fn wait_channel_open(&self, timeout: Duration) -> bool {
        let Some(engine) = self.engine() else {
            return false;
        };
        match engine.channel.transport() {
            Some(transport) => transport.wait_for_open(timeout).await,
            None => false,
        }
    }

    async fn can_make_request(&self) -> tinge_domain::usage::RequestDecision {
        let Some(engine) = self.engine() else {
            return tinge_domain::usage::RequestDecision::allowed();
        };
        let Some(credential) = engine.credential() else {
            return tinge_domain::usage::RequestDecision::allowed();
        };
        engine.gateway.can_make_request(&credential).await
    }

    async fn interrupt_assistant(&self) {
        if let Some(engine) = self.engine() {
            engine.router.interrupt(None).await;
        }
    }

    fn set_mic_enabled(&self, enabled: bool) {
        if let Some(engine) = self.engine() {
            if let Some(transport) = engine.channel.transport() {
                transport.set_mic_enabled(enabled);
            }
        }
    }

    async fn start_user_capture(&self) -> Result<()> {
        match self.engine() {
            Some(engine) => engine.capture.start_user().await.map(|_| ()),
            None => Ok(()),
        }
    }

    async fn stop_user_capture(&self) {
        if let Some(engine) = self.engine() {
            if let Some(duration_secs) = engine.capture.stop_user().await {
                engine.usage.track_audio(duration_secs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InMemoryProfileStore;
    use crate::testing::{FakeRecorder, MemoryUtteranceStore};
    use tinge_domain::utterance::DeviceType;

    fn deps() -> SessionDeps {
        SessionDeps {
            recorder: Arc::new(FakeRecorder),
            store: Arc::new(MemoryUtteranceStore::default()),
            profiles: Arc::new(InMemoryProfileStore::default()),
            session_storage: None,
        }
    }

    #[tokio::test]
    async fn engine_builds_offline() {
        let config = SessionConfig::for_device("http://localhost:3000", DeviceType::Desktop);
        let (engine, _rx) =
            SessionEngine::new(config, "wss://api.example/v1/realtime", deps()).unwrap();

        assert!(engine.credential().is_none());
        let ptt = engine.ptt();
        let state = ptt.state();
        assert!(state.is_first_connection_press);
        assert!(!state.is_connected);
    }

    #[tokio::test]
    async fn feedback_reaches_the_correction_log() {
        let config = SessionConfig::for_device("http://localhost:3000", DeviceType::Mobile);
        let (engine, _rx) =
            SessionEngine::new(config, "wss://api.example/v1/realtime", deps()).unwrap();

        let record = engine.corrections().detect(
            "yo fue",
            "yo fui",
            tinge_domain::correction::CorrectionType::Grammar,
        );
        assert!(engine.set_correction_feedback(&record.id, UserFeedback::Agree));
        assert!(!engine.set_correction_feedback("missing", UserFeedback::Agree));
    }
}
