//! Utterance capture and transcript binding.
//!
//! Two capture contexts (user and assistant) scope a recording resource
//! that is guaranteed released on stop, even when finalization fails. On
//! finalize, the gateway transcription round trip attaches word timings;
//! if that fails the utterance is kept with empty timings rather than
//! dropped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;

use tinge_domain::error::Result;
use tinge_domain::utterance::{AudioPayload, DeviceType, Speaker, UtteranceRecord};

use crate::gateway::GatewayClient;
use crate::queue::AsyncQueue;
use crate::ui::{UiEvent, UiSink};

/// Prefix length for the user-transcription idempotency key.
const DEDUP_PREFIX_LEN: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Device-facing recorder. Implementations own the actual audio plumbing.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start(&self, speaker: Speaker) -> Result<Box<dyn CaptureSession>>;
}

/// One in-flight recording. Consuming `stop` releases the resource.
#[async_trait]
pub trait CaptureSession: Send {
    async fn stop(self: Box<Self>) -> Result<AudioPayload>;
}

/// External storage collaborator; the core never deletes records.
#[async_trait]
pub trait UtteranceStore: Send + Sync {
    async fn save(&self, record: &UtteranceRecord, audio: Option<&AudioPayload>) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capture controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ActiveCapture {
    session: Box<dyn CaptureSession>,
    started_ms: i64,
}

pub struct CaptureController {
    recorder: Arc<dyn Recorder>,
    store: Arc<dyn UtteranceStore>,
    gateway: Arc<GatewayClient>,
    ui: UiSink,
    device: DeviceType,
    user: Mutex<Option<ActiveCapture>>,
    ai: Mutex<Option<ActiveCapture>>,
    pending_user: SyncMutex<Option<(UtteranceRecord, Option<AudioPayload>)>>,
    dedup: SyncMutex<HashSet<String>>,
    word_queue: AsyncQueue<(String, Speaker)>,
}

impl CaptureController {
    pub fn new(
        recorder: Arc<dyn Recorder>,
        store: Arc<dyn UtteranceStore>,
        gateway: Arc<GatewayClient>,
        ui: UiSink,
        device: DeviceType,
    ) -> Arc<Self> {
        let word_ui = ui.clone();
        let word_queue = AsyncQueue::new(
            move |(word, speaker): (String, Speaker)| {
                let ui = word_ui.clone();
                async move {
                    ui.emit(UiEvent::TranscriptWord {
                        word,
                        speaker,
                        device_type: device,
                    });
                    Ok(())
                }
            },
            |e| tracing::warn!(error = %e, "word render failed"),
        );
        Arc::new(Self {
            recorder,
            store,
            gateway,
            ui,
            device,
            user: Mutex::new(None),
            ai: Mutex::new(None),
            pending_user: SyncMutex::new(None),
            dedup: SyncMutex::new(HashSet::new()),
            word_queue,
        })
    }

    // ── Assistant capture ────────────────────────────────────────────

    /// Begin recording the assistant. `false` when already recording.
    pub async fn start_ai(&self) -> Result<bool> {
        let mut guard = self.ai.lock().await;
        if guard.is_some() {
            return Ok(false);
        }
        let session = self.recorder.start(Speaker::Ai).await?;
        *guard = Some(ActiveCapture {
            session,
            started_ms: Utc::now().timestamp_millis(),
        });
        tracing::debug!("assistant capture started");
        Ok(true)
    }

    pub async fn ai_active(&self) -> bool {
        self.ai.lock().await.is_some()
    }

    /// Stop the assistant capture and bind its transcript.
    ///
    /// Emits `utterance.added` (with the interrupted flag) and returns the
    /// finished record. `None` when no capture was active.
    pub async fn finalize_ai(
        &self,
        transcript: &str,
        interrupted: bool,
        utterance_id: Option<String>,
    ) -> Option<UtteranceRecord> {
        let capture = self.ai.lock().await.take()?;
        let started_ms = capture.started_ms;
        let audio = match capture.session.stop().await {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, "assistant capture stop failed");
                None
            }
        };

        let mut record = UtteranceRecord::new(Speaker::Ai, transcript.trim());
        record.timestamp_ms = started_ms;
        if let Some(id) = utterance_id {
            record.id = id;
        }

        match &audio {
            Some(payload) => match self.gateway.transcribe(payload).await {
                Ok(transcription) => {
                    record.bind_transcription(transcription);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "assistant transcription failed, keeping empty timings");
                    record.bind_empty_transcription();
                }
            },
            None => {
                record.bind_empty_transcription();
            }
        }

        if let Err(e) = self.store.save(&record, audio.as_ref()).await {
            tracing::warn!(error = %e, "utterance save failed");
        }
        self.ui.emit(UiEvent::UtteranceAdded {
            record: record.clone(),
            interrupted,
            device_type: Some(self.device),
        });
        Some(record)
    }

    // ── User capture ─────────────────────────────────────────────────

    /// Begin recording the user. `false` when already recording.
    pub async fn start_user(&self) -> Result<bool> {
        let mut guard = self.user.lock().await;
        if guard.is_some() {
            return Ok(false);
        }
        let session = self.recorder.start(Speaker::User).await?;
        *guard = Some(ActiveCapture {
            session,
            started_ms: Utc::now().timestamp_millis(),
        });
        tracing::debug!("user capture started");
        Ok(true)
    }

    pub async fn user_active(&self) -> bool {
        self.user.lock().await.is_some()
    }

    /// Stop the user capture and park the record for enrichment by the
    /// upstream transcription event. Returns the clip duration for the
    /// audio estimate path.
    pub async fn stop_user(&self) -> Option<f64> {
        let Some(capture) = self.user.lock().await.take() else {
            return None;
        };
        let started_ms = capture.started_ms;
        let audio = match capture.session.stop().await {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, "user capture stop failed");
                None
            }
        };

        let mut record = UtteranceRecord::new(Speaker::User, "");
        record.timestamp_ms = started_ms;
        if let Some(payload) = &audio {
            match self.gateway.transcribe(payload).await {
                Ok(transcription) => {
                    record.bind_transcription(transcription);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "user transcription failed, keeping empty timings");
                    record.bind_empty_transcription();
                }
            }
        } else {
            record.bind_empty_transcription();
        }
        let duration = audio.as_ref().map(|payload| payload.duration_secs);
        *self.pending_user.lock() = Some((record, audio));
        duration
    }

    /// Upstream told us what the user said. Resolve the pending record
    /// (or synthesize one), enrich it, and render per-word events.
    ///
    /// Enrichment is serial per utterance: a repeated event with the same
    /// content inside the same second is a no-op.
    pub async fn on_user_transcription_completed(&self, transcript: &str) -> Option<UtteranceRecord> {
        let text = transcript.trim();
        if text.is_empty() {
            return None;
        }

        let prefix: String = text.chars().take(DEDUP_PREFIX_LEN).collect();
        let dedup_key = format!(
            "{}|user|{}|{}",
            self.device.as_str(),
            prefix,
            Utc::now().timestamp()
        );
        if !self.dedup.lock().insert(dedup_key) {
            tracing::debug!("duplicate user transcription dropped");
            return None;
        }

        for word in text.split_whitespace() {
            self.word_queue.push((word.to_string(), Speaker::User));
        }

        // Resolve: parked record, or a still-running capture (release
        // buffer pending), or nothing at all.
        let pending = self.pending_user.lock().take();
        let (mut record, audio) = match pending {
            Some(parked) => parked,
            None => {
                if self.user_active().await {
                    self.stop_user().await;
                }
                match self.pending_user.lock().take() {
                    Some(parked) => parked,
                    None => {
                        let mut record = UtteranceRecord::new(Speaker::User, "");
                        record.bind_empty_transcription();
                        (record, None)
                    }
                }
            }
        };

        record.text = text.to_string();
        if record.full_text.as_deref().unwrap_or("").is_empty() {
            record.full_text = Some(text.to_string());
        }

        if let Err(e) = self.store.save(&record, audio.as_ref()).await {
            tracing::warn!(error = %e, "utterance save failed");
        }
        self.ui.emit(UiEvent::UtteranceAdded {
            record: record.clone(),
            interrupted: false,
            device_type: Some(self.device),
        });
        Some(record)
    }
}
