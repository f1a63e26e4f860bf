//! Shared test doubles.

use parking_lot::Mutex;

use tinge_domain::error::Result;
use tinge_domain::utterance::{AudioPayload, UtteranceRecord};
use tinge_protocol::ClientEvent;

use crate::capture::{CaptureSession, Recorder, UtteranceStore};
use crate::transport::DataChannel;

/// A data channel that records every event it is asked to send.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<ClientEvent>>,
}

#[async_trait::async_trait]
impl DataChannel for RecordingChannel {
    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        self.sent.lock().push(event.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

impl RecordingChannel {
    pub fn kinds(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|event| {
                serde_json::to_value(event).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

/// Recorder producing a fixed tiny payload.
#[derive(Default)]
pub struct FakeRecorder;

pub struct FakeSession;

#[async_trait::async_trait]
impl Recorder for FakeRecorder {
    async fn start(
        &self,
        _speaker: tinge_domain::utterance::Speaker,
    ) -> Result<Box<dyn CaptureSession>> {
        Ok(Box::new(FakeSession))
    }
}

#[async_trait::async_trait]
impl CaptureSession for FakeSession {
    async fn stop(self: Box<Self>) -> Result<AudioPayload> {
        Ok(AudioPayload {
            bytes: vec![0u8; 16],
            duration_secs: 0.5,
            mime_type: "audio/webm".into(),
        })
    }
}

/// Store that remembers every saved record.
#[derive(Default)]
pub struct MemoryUtteranceStore {
    pub saved: Mutex<Vec<UtteranceRecord>>,
}

#[async_trait::async_trait]
impl UtteranceStore for MemoryUtteranceStore {
    async fn save(&self, record: &UtteranceRecord, _audio: Option<&AudioPayload>) -> Result<()> {
        self.saved.lock().push(record.clone());
        Ok(())
    }
}
