//! Push-to-talk input state machine.
//!
//! The first press is connect-only: it establishes the transport behind a
//! "Connecting…" feedback and releases without enabling the mic. Later
//! presses check the token limit, wait for the data channel, and enable
//! capture. Releases disable the mic after a device-dependent buffer so
//! the trailing audio frame is not clipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use tinge_domain::config::SessionConfig;

use crate::ui::{UiEvent, UiSink};

/// Where a press/release came from. Touch presses are debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Mouse,
    Touch,
}

/// Observable PTT state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PttState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_first_connection_press: bool,
    pub is_mic_active: bool,
}

impl Default for PttState {
    fn default() -> Self {
        Self {
            is_connected: false,
            is_connecting: false,
            is_first_connection_press: true,
            is_mic_active: false,
        }
    }
}

/// What the PTT machine drives: the transport, the gateway limit check,
/// and the capture pipeline. Implemented by the session engine.
#[async_trait::async_trait]
pub trait PttBackend: Send + Sync {
    async fn connect(&self) -> tinge_domain::Result<()>;
    async fn wait_channel_open(&self, timeout: Duration) -> bool;
    async fn can_make_request(&self) -> tinge_domain::usage::RequestDecision;
    /// Barge-in hook: cancel the assistant's turn if it is speaking.
    async fn interrupt_assistant(&self);
    fn set_mic_enabled(&self, enabled: bool);
    async fn start_user_capture(&self) -> tinge_domain::Result<()>;
    async fn stop_user_capture(&self);
}

pub struct PttOrchestrator {
    backend: Arc<dyn PttBackend>,
    ui: UiSink,
    state: Mutex<PttState>,
    last_touch_press: Mutex<Option<Instant>>,
    release_task: Mutex<Option<JoinHandle<()>>>,
    connecting_feedback: Duration,
    open_timeout: Duration,
    release_buffer: Duration,
    touch_debounce: Duration,
}

impl PttOrchestrator {
    pub fn new(backend: Arc<dyn PttBackend>, ui: UiSink, config: &SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            ui,
            state: Mutex::new(PttState::default()),
            last_touch_press: Mutex::new(None),
            release_task: Mutex::new(None),
            connecting_feedback: Duration::from_millis(config.connecting_feedback_ms),
            open_timeout: Duration::from_millis(config.channel_open_timeout_ms),
            release_buffer: Duration::from_millis(config.release_buffer_ms()),
            touch_debounce: Duration::from_millis(config.touch_debounce_ms),
        })
    }

    pub fn state(&self) -> PttState {
        *self.state.lock()
    }

    pub async fn press(self: &Arc<Self>, source: InputSource) {
        self.press_at(source, Instant::now()).await;
    }

    pub(crate) async fn press_at(self: &Arc<Self>, source: InputSource, now: Instant) {
        if source == InputSource::Touch && !self.accept_touch_press(now) {
            return;
        }
        // A press during the release buffer keeps the mic open.
        if let Some(handle) = self.release_task.lock().take() {
            handle.abort();
        }

        let first = self.state.lock().is_first_connection_press;
        if first {
            self.connect_only_press().await;
            return;
        }

        let decision = self.backend.can_make_request().await;
        if decision.is_token_limit() {
            tracing::info!("press blocked: token limit reached");
            self.ui.emit(UiEvent::TokenLimitReached);
            return;
        }

        self.backend.interrupt_assistant().await;

        if !self.backend.wait_channel_open(self.open_timeout).await {
            tracing::warn!("data channel did not open in time, press ignored");
            return;
        }

        self.backend.set_mic_enabled(true);
        self.state.lock().is_mic_active = true;
        if let Err(e) = self.backend.start_user_capture().await {
            tracing::warn!(error = %e, "user capture start failed");
        }
    }

    /// First press: establish the transport, leave the mic alone.
    async fn connect_only_press(&self) {
        {
            let mut state = self.state.lock();
            if state.is_connecting {
                return;
            }
            state.is_connecting = true;
        }
        self.ui.emit(UiEvent::ConnectingFeedback {
            label: "Connecting…",
            duration_ms: self.connecting_feedback.as_millis() as u64,
        });

        match self.backend.connect().await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.is_connected = true;
                state.is_connecting = false;
                state.is_first_connection_press = false;
                drop(state);
                self.ui.emit(UiEvent::ConnectionState {
                    connected: true,
                    connecting: false,
                    reconnect_required: false,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.state.lock().is_connecting = false;
                self.ui.emit(UiEvent::ConnectionState {
                    connected: false,
                    connecting: false,
                    reconnect_required: true,
                });
            }
        }
    }

    /// Release from any source. `mouseup`, `touchend` and `touchcancel`
    /// all arrive here.
    pub async fn release(self: &Arc<Self>) {
        if !self.state.lock().is_mic_active {
            return;
        }
        let mut task = self.release_task.lock();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let orchestrator = self.clone();
        let buffer = self.release_buffer;
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(buffer).await;
            orchestrator.release_now().await;
        }));
    }

    /// The post-buffer half of a release.
    pub(crate) async fn release_now(&self) {
        self.backend.set_mic_enabled(false);
        self.backend.stop_user_capture().await;
        self.state.lock().is_mic_active = false;
    }

    /// Touchmove while the mic is active is consumed to suppress
    /// scrolling. Returns whether the event was consumed.
    pub fn touch_move(&self) -> bool {
        self.state.lock().is_mic_active
    }

    fn accept_touch_press(&self, now: Instant) -> bool {
        let mut last = self.last_touch_press.lock();
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < self.touch_debounce {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tinge_domain::usage::{RequestDecision, REASON_TOKEN_LIMIT};
    use tinge_domain::utterance::DeviceType;

    #[derive(Default)]
    struct FakeBackend {
        connects: AtomicUsize,
        interrupts: AtomicUsize,
        capture_starts: AtomicUsize,
        capture_stops: AtomicUsize,
        mic: AtomicBool,
        at_limit: AtomicBool,
        channel_open: AtomicBool,
        fail_connect: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PttBackend for FakeBackend {
        async fn connect(&self) -> tinge_domain::Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(tinge_domain::Error::Transport("refused".into()));
            }
            self.channel_open.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn wait_channel_open(&self, _timeout: Duration) -> bool {
            self.channel_open.load(Ordering::SeqCst)
        }
        async fn can_make_request(&self) -> RequestDecision {
            if self.at_limit.load(Ordering::SeqCst) {
                RequestDecision::denied(REASON_TOKEN_LIMIT)
            } else {
                RequestDecision::allowed()
            }
        }
        async fn interrupt_assistant(&self) {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
        }
        fn set_mic_enabled(&self, enabled: bool) {
            self.mic.store(enabled, Ordering::SeqCst);
        }
        async fn start_user_capture(&self) -> tinge_domain::Result<()> {
            self.capture_starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop_user_capture(&self) {
            self.capture_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn orchestrator(
        backend: Arc<FakeBackend>,
        device: DeviceType,
    ) -> (
        Arc<PttOrchestrator>,
        tokio::sync::mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let (ui, rx) = UiSink::channel();
        let mut config = SessionConfig::for_device("http://localhost:3000", device);
        config.touch_debounce_ms = 100;
        (PttOrchestrator::new(backend, ui, &config), rx)
    }

    #[tokio::test]
    async fn first_press_is_connect_only() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, mut rx) = orchestrator(backend.clone(), DeviceType::Desktop);

        ptt.press(InputSource::Mouse).await;

        let state = ptt.state();
        assert!(state.is_connected);
        assert!(!state.is_first_connection_press);
        assert!(!state.is_mic_active);
        assert!(!backend.mic.load(Ordering::SeqCst));
        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
        assert_eq!(backend.capture_starts.load(Ordering::SeqCst), 0);

        match rx.recv().await.unwrap() {
            UiEvent::ConnectingFeedback { label, duration_ms } => {
                assert_eq!(label, "Connecting…");
                assert_eq!(duration_ms, 1_200);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_press_enables_mic_and_capture() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, _rx) = orchestrator(backend.clone(), DeviceType::Desktop);

        ptt.press(InputSource::Mouse).await;
        ptt.press(InputSource::Mouse).await;

        assert!(ptt.state().is_mic_active);
        assert!(backend.mic.load(Ordering::SeqCst));
        assert_eq!(backend.capture_starts.load(Ordering::SeqCst), 1);
        assert_eq!(backend.interrupts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn limit_blocks_the_press() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, mut rx) = orchestrator(backend.clone(), DeviceType::Desktop);
        ptt.press(InputSource::Mouse).await;
        while rx.try_recv().is_ok() {}

        backend.at_limit.store(true, Ordering::SeqCst);
        ptt.press(InputSource::Mouse).await;

        assert!(!ptt.state().is_mic_active);
        assert!(matches!(rx.try_recv(), Ok(UiEvent::TokenLimitReached)));
    }

    #[tokio::test]
    async fn failed_connect_prompts_reconnect() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_connect.store(true, Ordering::SeqCst);
        let (ptt, mut rx) = orchestrator(backend, DeviceType::Desktop);

        ptt.press(InputSource::Mouse).await;
        let state = ptt.state();
        assert!(!state.is_connected);
        assert!(state.is_first_connection_press);

        let mut saw_reconnect = false;
        while let Ok(event) = rx.try_recv() {
            if let UiEvent::ConnectionState {
                reconnect_required, ..
            } = event
            {
                saw_reconnect = reconnect_required;
            }
        }
        assert!(saw_reconnect);
    }

    #[tokio::test]
    async fn touch_presses_are_debounced() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, _rx) = orchestrator(backend.clone(), DeviceType::Mobile);
        let now = Instant::now();

        ptt.press_at(InputSource::Touch, now).await;
        ptt.press_at(InputSource::Touch, now + Duration::from_millis(50))
            .await;
        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);

        ptt.press_at(InputSource::Touch, now + Duration::from_millis(200))
            .await;
        assert_eq!(backend.capture_starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_disables_mic_after_buffer() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, _rx) = orchestrator(backend.clone(), DeviceType::Desktop);
        ptt.press(InputSource::Mouse).await;
        ptt.press(InputSource::Mouse).await;
        assert!(ptt.state().is_mic_active);

        ptt.release_now().await;
        assert!(!ptt.state().is_mic_active);
        assert!(!backend.mic.load(Ordering::SeqCst));
        assert_eq!(backend.capture_stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn touch_move_is_consumed_only_while_active() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, _rx) = orchestrator(backend.clone(), DeviceType::Mobile);
        assert!(!ptt.touch_move());

        ptt.press_at(InputSource::Touch, Instant::now()).await;
        ptt.press_at(InputSource::Touch, Instant::now() + Duration::from_secs(1))
            .await;
        assert!(ptt.touch_move());
    }

    #[tokio::test]
    async fn release_without_active_mic_is_a_no_op() {
        let backend = Arc::new(FakeBackend::default());
        let (ptt, _rx) = orchestrator(backend.clone(), DeviceType::Desktop);
        ptt.release().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.capture_stops.load(Ordering::SeqCst), 0);
    }
}
