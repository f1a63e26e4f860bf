//! Client-side token usage tracker: a debounced estimator in front of the
//! gateway ledger.
//!
//! Text and audio accumulate in buffers; a single trailing timer flushes
//! the combined estimate. Actual usage reports are forwarded immediately.
//! Every failure is logged and swallowed: the session must stay functional
//! without usage telemetry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use tinge_domain::usage::UsageReport;

use crate::gateway::GatewayClient;

#[derive(Default)]
struct EstimateBuffers {
    text: String,
    audio_secs: f64,
}

impl EstimateBuffers {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.audio_secs <= 0.0
    }
}

pub struct UsageTracker {
    gateway: Arc<GatewayClient>,
    credential: RwLock<Option<String>>,
    buffers: Mutex<EstimateBuffers>,
    pending: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl UsageTracker {
    pub fn new(gateway: Arc<GatewayClient>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            credential: RwLock::new(None),
            buffers: Mutex::new(EstimateBuffers::default()),
            pending: Mutex::new(None),
            debounce,
        })
    }

    pub fn set_credential(&self, key: impl Into<String>) {
        *self.credential.write() = Some(key.into());
    }

    /// Accumulate estimate text and (re)arm the trailing timer.
    pub fn track_text(self: &Arc<Self>, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        {
            let mut buffers = self.buffers.lock();
            if !buffers.text.is_empty() {
                buffers.text.push(' ');
            }
            buffers.text.push_str(text.trim());
        }
        self.arm_timer();
    }

    /// Accumulate audio seconds and (re)arm the trailing timer.
    pub fn track_audio(self: &Arc<Self>, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        self.buffers.lock().audio_secs += seconds;
        self.arm_timer();
    }

    fn arm_timer(self: &Arc<Self>) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        let tracker = self.clone();
        let debounce = self.debounce;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            tracker.flush().await;
        }));
    }

    /// Send the accumulated estimate now. Buffers are cleared on success
    /// and restored on failure for the next flush.
    pub async fn flush(&self) {
        let taken = {
            let mut buffers = self.buffers.lock();
            if buffers.is_empty() {
                return;
            }
            std::mem::take(&mut *buffers)
        };
        let Some(key) = self.credential.read().clone() else {
            tracing::debug!("usage estimate dropped: no credential yet");
            return;
        };

        match self
            .gateway
            .apply_estimate(&key, &taken.text, taken.audio_secs)
            .await
        {
            Ok(snapshot) => {
                tracing::debug!(
                    estimated = snapshot.estimated_tokens,
                    current = snapshot.current_tokens,
                    "usage estimate applied"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "usage estimate failed");
                let mut buffers = self.buffers.lock();
                if buffers.text.is_empty() {
                    buffers.text = taken.text;
                } else {
                    buffers.text = format!("{} {}", taken.text, buffers.text);
                }
                buffers.audio_secs += taken.audio_secs;
            }
        }
    }

    /// Forward an upstream usage report immediately (no batching).
    pub async fn update_actual(&self, report: &UsageReport) {
        let Some(key) = self.credential.read().clone() else {
            return;
        };
        if let Err(e) = self.gateway.apply_actual(&key, report).await {
            tracing::warn!(error = %e, "actual usage update failed");
        }
    }

    /// Cancel the pending timer and clear all buffers (transport reset).
    pub fn reset(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
        *self.buffers.lock() = EstimateBuffers::default();
    }

    #[cfg(test)]
    fn buffered_text(&self) -> String {
        self.buffers.lock().text.clone()
    }

    #[cfg(test)]
    fn buffered_audio(&self) -> f64 {
        self.buffers.lock().audio_secs
    }
}
