//! In-memory session and decoder used by engine tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{
    AudioChunk, Connection, FilteredPrompt, MusicSession, SessionConnector, SessionEvent,
    WeightedPrompt,
};
use crate::{
    audio::PcmBuffer,
    common::errors::{DecodeError, SessionError},
    decoder::Decoder,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Play,
    Pause,
    Stop,
    Prompts(Vec<WeightedPrompt>),
    Close,
}

#[derive(Default)]
pub struct MockSession {
    calls: Mutex<Vec<SessionCall>>,
    pub reject_prompts: AtomicBool,
}

impl MockSession {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().clone()
    }

    pub fn prompt_updates(&self) -> Vec<Vec<WeightedPrompt>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SessionCall::Prompts(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MusicSession for MockSession {
    async fn play(&self) -> Result<(), SessionError> {
        self.calls.lock().push(SessionCall::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.calls.lock().push(SessionCall::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.calls.lock().push(SessionCall::Stop);
        Ok(())
    }

    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError> {
        if self.reject_prompts.load(Ordering::SeqCst) {
            return Err(SessionError::Rejected("mock rejection".into()));
        }
        self.calls.lock().push(SessionCall::Prompts(prompts));
        Ok(())
    }

    async fn close(&self) {
        self.calls.lock().push(SessionCall::Close);
    }
}

/// The server side of a mock connection.
#[derive(Clone)]
pub struct MockLink {
    pub session: Arc<MockSession>,
    pub events: flume::Sender<SessionEvent>,
}

impl MockLink {
    /// Push one notification carrying a chunk per duration (seconds).
    pub fn send_chunks(&self, durations: &[f64]) {
        let chunks = durations
            .iter()
            .map(|d| AudioChunk {
                data: Bytes::from(d.to_string()),
                mime_type: None,
            })
            .collect();
        let _ = self.events.send(SessionEvent::AudioChunks(chunks));
    }

    pub fn send_filtered(&self, text: &str) {
        let _ = self.events.send(SessionEvent::FilteredPrompt(FilteredPrompt {
            text: text.into(),
            reason: "mock".into(),
        }));
    }

    pub fn send_error(&self, message: &str) {
        let _ = self.events.send(SessionEvent::Error(message.into()));
    }
}

#[derive(Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
    links: Mutex<Vec<MockLink>>,
}

impl MockConnector {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// The most recent connection.
    pub fn link(&self) -> MockLink {
        self.links.lock().last().cloned().expect("no connection made")
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<Connection, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Connect("mock refused".into()));
        }

        let session = Arc::new(MockSession::default());
        let (tx, rx) = flume::unbounded();
        self.links.lock().push(MockLink {
            session: session.clone(),
            events: tx,
        });
        Ok(Connection {
            session,
            events: rx,
        })
    }
}

/// Reads each payload as an ASCII duration in seconds and yields a constant
/// 0.5 level buffer of that length.
pub struct DurationDecoder;

#[async_trait]
impl Decoder for DurationDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Bytes, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(Bytes::copy_from_slice(raw))
    }

    async fn decode_audio_data(
        &self,
        bytes: Bytes,
        sample_rate: u32,
        channels: usize,
    ) -> Result<PcmBuffer, DecodeError> {
        let secs: f64 = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::Empty)?;
        let frames = (secs * sample_rate as f64).round() as usize;
        Ok(PcmBuffer::new(vec![0.5; frames * channels], sample_rate, channels))
    }
}
