//! Transport layer: the bidirectional realtime channel.
//!
//! The data channel is realized as a WebSocket carrying JSON frames. The
//! microphone track is owned here for the lifetime of the connection; PTT
//! only toggles its enabled flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tinge_domain::error::{Error, Result};
use tinge_protocol::ClientEvent;

/// Why the transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Orderly close; the upper layer may rebuild at its leisure.
    Closed,
    /// Connection failure; the UI should prompt a reconnect.
    Failed,
}

/// Events surfaced by the transport to the session engine.
#[derive(Debug)]
pub enum TransportEvent {
    ChannelOpen,
    Frame(String),
    Disconnected { reason: DisconnectReason },
}

/// Sending half of the data channel, as seen by the rest of the engine.
#[async_trait::async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_event(&self, event: &ClientEvent) -> Result<()>;
    fn is_open(&self) -> bool;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    open: AtomicBool,
    open_notify: Notify,
    mic_enabled: AtomicBool,
    shutdown: CancellationToken,
}

impl WsTransport {
    /// Connect to the realtime service and start the reader/writer tasks.
    ///
    /// Returns the transport handle plus the event stream the session
    /// engine pumps.
    pub async fn connect(
        url: &str,
        client_secret: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Transport(format!("invalid realtime url: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {client_secret}"))
            .map_err(|_| Error::Transport("credential is not header-safe".into()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        tracing::info!(url = %url, "connecting realtime transport");
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let shutdown = CancellationToken::new();

        let transport = Arc::new(Self {
            outbound: outbound_tx,
            open: AtomicBool::new(true),
            open_notify: Notify::new(),
            mic_enabled: AtomicBool::new(false),
            shutdown: shutdown.clone(),
        });
        transport.open_notify.notify_waiters();
        let _ = event_tx.send(TransportEvent::ChannelOpen);

        // ── Writer task ──────────────────────────────────────────────
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        msg = outbound_rx.recv() => {
                            let Some(msg) = msg else { break };
                            if let Err(e) = sink.send(msg).await {
                                tracing::warn!(error = %e, "outbound send failed");
                                break;
                            }
                        }
                    }
                }
            });
        }

        // ── Reader task ──────────────────────────────────────────────
        {
            let transport = transport.clone();
            tokio::spawn(async move {
                let reason = loop {
                    tokio::select! {
                        _ = transport.shutdown.cancelled() => break DisconnectReason::Closed,
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = event_tx.send(TransportEvent::Frame(text));
                            }
                            Some(Ok(Message::Close(_))) | None => break DisconnectReason::Closed,
                            Some(Ok(_)) => {} // binary/ping/pong handled by tungstenite
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "realtime transport failed");
                                break DisconnectReason::Failed;
                            }
                        }
                    }
                };
                transport.open.store(false, Ordering::SeqCst);
                let _ = event_tx.send(TransportEvent::Disconnected { reason });
            });
        }

        Ok((transport, event_rx))
    }

    /// Wait until the data channel is open, up to `timeout`.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }
        tokio::time::timeout(timeout, self.open_notify.notified())
            .await
            .is_ok()
            && self.is_open()
    }

    /// Toggle the microphone track. The track itself stays acquired for the
    /// lifetime of the connection.
    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    /// Send one microphone frame. Silently dropped while the mic is
    /// disabled: PTT gates transmission, not acquisition.
    pub async fn send_audio_frame(&self, pcm: &[u8]) -> Result<()> {
        if !self.mic_enabled() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(pcm);
        self.send_event(&ClientEvent::InputAudioBufferAppend { audio })
            .await
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

#[async_trait::async_trait]
impl DataChannel for WsTransport {
    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Transport("data channel is not open".into()));
        }
        let json = serde_json::to_string(event)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|_| Error::Transport("data channel writer is gone".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// A data channel that materializes on first connect.
///
/// The engine is built before the first PTT press establishes the
/// transport; components hold this handle and fail with a transport error
/// if they send before then.
#[derive(Default)]
pub struct ChannelHandle {
    inner: parking_lot::RwLock<Option<Arc<WsTransport>>>,
}

impl ChannelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, transport: Arc<WsTransport>) {
        *self.inner.write() = Some(transport);
    }

    pub fn transport(&self) -> Option<Arc<WsTransport>> {
        self.inner.read().clone()
    }
}

#[async_trait::async_trait]
impl DataChannel for ChannelHandle {
    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        match self.transport() {
            Some(transport) => transport.send_event(event).await,
            None => Err(Error::Transport("data channel is not connected".into())),
        }
    }

    fn is_open(&self) -> bool {
        self.transport().is_some_and(|t| t.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unattached_handle_rejects_sends() {
        let handle = ChannelHandle::new();
        assert!(!handle.is_open());
        let err = handle
            .send_event(&ClientEvent::ResponseCreate)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
