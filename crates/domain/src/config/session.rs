use crate::utterance::DeviceType;

/// Configuration for one client-side tutoring session.
///
/// Owned by the embedding application and handed to the session engine at
/// construction. The timing fields encode the interaction contract: mic
/// release buffering, touch debouncing, the assistant drain window, and the
/// estimate debounce.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend gateway.
    pub gateway_base_url: String,
    /// Device class the UI is running on; selects buffers and cooldowns.
    pub device_type: DeviceType,
    /// System prompt sent as the first conversation item after the data
    /// channel opens.
    pub system_prompt: String,
    /// Model used for input (user speech) transcription, advertised in the
    /// session update.
    pub transcription_model: String,
    /// How long the "Connecting…" feedback stays up on the first press.
    pub connecting_feedback_ms: u64,
    /// Maximum wait for the data channel to open before a press gives up.
    pub channel_open_timeout_ms: u64,
    /// Window for coalescing duplicate touch presses.
    pub touch_debounce_ms: u64,
    /// Trailing debounce for the usage estimator.
    pub estimate_debounce_ms: u64,
    /// Drain window after an interrupt before the turn gate gives up
    /// waiting for a terminal event.
    pub drain_timeout_ms: u64,
    /// Cooldown between bubble creations on mobile.
    pub bubble_cooldown_ms: u64,
}

impl SessionConfig {
    /// Sensible defaults for the given device class.
    pub fn for_device(gateway_base_url: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            gateway_base_url: gateway_base_url.into(),
            device_type,
            system_prompt: String::new(),
            transcription_model: "whisper-1".into(),
            connecting_feedback_ms: 1_200,
            channel_open_timeout_ms: 5_000,
            touch_debounce_ms: 100,
            estimate_debounce_ms: 200,
            drain_timeout_ms: 4_000,
            bubble_cooldown_ms: 500,
        }
    }

    /// Mic release buffer: long enough to avoid clipping the trailing audio
    /// frame, longer on mobile where capture latency is higher.
    pub fn release_buffer_ms(&self) -> u64 {
        match self.device_type {
            DeviceType::Desktop => 500,
            DeviceType::Mobile => 1_000,
        }
    }
}
