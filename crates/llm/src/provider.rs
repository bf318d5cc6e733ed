//! Realtime Provider Adapter (C3): a bidirectional-channel abstraction over
//! an external realtime speech/conversation model, generalizing the
//! teacher's `LanguageModel`/`SpeechToText`/`TextToSpeech` trait split into
//! one `RealtimeProvider` with a single outbound event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use voice_agent_core::AudioFrame;

use crate::error::{LlmError, Result};

/// Reconnect backoff schedule, applied on transport error before the
/// connection is declared `PROVIDER_UNAVAILABLE`.
pub const RECONNECT_BACKOFFS_MS: [u64; 3] = [250, 500, 1000];
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionKind {
    Partial,
    Final,
}

#[derive(Debug, Clone)]
pub struct Transcription {
    pub kind: TranscriptionKind,
    pub text: String,
    pub lang: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub enum AgentDelta {
    Text(String),
    Audio(AudioFrame),
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FunctionCallComplete {
    pub call_id: String,
    pub args: serde_json::Value,
}

/// Everything a `RealtimeProvider` can emit back to the caller (C7 via C4).
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SessionReady,
    SpeechStarted { audio_start_ms: u64 },
    SpeechStopped { audio_end_ms: u64 },
    Transcription(Transcription),
    AgentDelta(AgentDelta),
    FunctionCall(FunctionCall),
    FunctionCallComplete(FunctionCallComplete),
    ConversationInterrupted,
    Error { code: String, message: String },
}

/// Capability set: `connect`, `sendAudio`, `sendText`, `cancel`, `close`.
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    /// Opens the session and returns the channel the caller drains for
    /// `ProviderEvent`s. Emits `session_ready` as the first event on success.
    async fn connect(&self) -> Result<mpsc::Receiver<ProviderEvent>>;

    async fn send_audio(&self, frame: AudioFrame) -> Result<()>;

    async fn send_text(&self, text: &str) -> Result<()>;

    /// Barge-in: must take effect within 50ms and is followed by a
    /// `conversation_interrupted` event on the session's channel.
    async fn cancel(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Wraps any `RealtimeProvider` with the reconnect-with-backoff policy: up
/// to [`MAX_RECONNECT_ATTEMPTS`] attempts at [`RECONNECT_BACKOFFS_MS`]
/// spacing before giving up with `PROVIDER_UNAVAILABLE`.
pub struct ReconnectingProvider<P: RealtimeProvider> {
    inner: Arc<P>,
}

impl<P: RealtimeProvider> ReconnectingProvider<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self { inner }
    }

    pub async fn connect_with_retry(&self) -> Result<mpsc::Receiver<ProviderEvent>> {
        let mut last_err = match self.inner.connect().await {
            Ok(rx) => return Ok(rx),
            Err(e) => e,
        };

        for (attempt, backoff_ms) in RECONNECT_BACKOFFS_MS.iter().enumerate() {
            tracing::warn!(attempt = attempt + 1, error = %last_err, "realtime provider connect failed, retrying");
            tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            match self.inner.connect().await {
                Ok(rx) => return Ok(rx),
                Err(e) => last_err = e,
            }
        }

        tracing::error!(error = %last_err, attempts = MAX_RECONNECT_ATTEMPTS, "realtime provider unavailable after exhausting reconnect attempts");
        Err(LlmError::ProviderUnavailable(last_err.to_string()))
    }
}

/// In-memory provider for tests and local development: scripted events,
/// records every call made against it.
pub struct MockRealtimeProvider {
    scripted_events: parking_lot::Mutex<Vec<ProviderEvent>>,
    sent_audio: parking_lot::Mutex<Vec<AudioFrame>>,
    sent_text: parking_lot::Mutex<Vec<String>>,
    cancelled: std::sync::atomic::AtomicUsize,
    fail_connect: std::sync::atomic::AtomicBool,
}

impl MockRealtimeProvider {
    pub fn new(scripted_events: Vec<ProviderEvent>) -> Self {
        Self {
            scripted_events: parking_lot::Mutex::new(scripted_events),
            sent_audio: parking_lot::Mutex::new(Vec::new()),
            sent_text: parking_lot::Mutex::new(Vec::new()),
            cancelled: std::sync::atomic::AtomicUsize::new(0),
            fail_connect: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent_text.lock().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeProvider for MockRealtimeProvider {
    async fn connect(&self) -> Result<mpsc::Receiver<ProviderEvent>> {
        if self.fail_connect.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(LlmError::Transport("mock connect failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(32);
        let _ = tx.send(ProviderEvent::SessionReady).await;
        for event in self.scripted_events.lock().drain(..) {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }

    async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        self.sent_audio.lock().push(frame);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.sent_text.lock().push(text.to_string());
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.cancelled.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_emits_session_ready_first() {
        let provider = MockRealtimeProvider::new(vec![ProviderEvent::SpeechStarted { audio_start_ms: 0 }]);
        let mut rx = provider.connect().await.unwrap();
        match rx.recv().await {
            Some(ProviderEvent::SessionReady) => {}
            other => panic!("expected SessionReady first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconnect_retries_until_success() {
        let provider = Arc::new(MockRealtimeProvider::new(vec![]));
        provider.fail_next_connect();
        let reconnecting = ReconnectingProvider::new(provider);
        let result = reconnecting.connect_with_retry().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancel_increments_counter() {
        let provider = MockRealtimeProvider::new(vec![]);
        provider.cancel().await.unwrap();
        assert_eq!(provider.cancel_count(), 1);
    }
}
