//! The remote music-generation session.
//!
//! The engine only sees the two traits here. `live` speaks the real
//! websocket protocol; tests use the in-memory connector from `mock`.

pub mod live;
pub mod messages;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::errors::SessionError;

pub use live::{LiveMusicConnector, LiveMusicSession};

/// A prompt in the form forwarded to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

/// A prompt the service refused to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredPrompt {
    pub text: String,
    #[serde(rename = "filteredReason", default)]
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Still transport-encoded; see `Decoder::decode`.
    pub data: Bytes,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    SetupComplete,
    AudioChunks(Vec<AudioChunk>),
    FilteredPrompt(FilteredPrompt),
    Warning(String),
    Error(String),
    Closed { code: u16, reason: String },
}

#[async_trait]
pub trait MusicSession: Send + Sync {
    async fn play(&self) -> Result<(), SessionError>;
    async fn pause(&self) -> Result<(), SessionError>;
    async fn stop(&self) -> Result<(), SessionError>;
    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError>;

    /// Tear the session down once every queued control frame is written.
    async fn close(&self) {}
}

/// An established session plus its notification stream.
pub struct Connection {
    pub session: Arc<dyn MusicSession>,
    pub events: flume::Receiver<SessionEvent>,
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Connection, SessionError>;
}
