use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message surfaced when the remote session errors out or closes.
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error, please restart audio.";

/// Message surfaced when a publish finds no prompt to forward.
pub const NO_ACTIVE_PROMPTS_MESSAGE: &str = "There needs to be one active prompt to play.";

/// Fault classes reported to the UI.
///
/// Underruns have no kind. They re-buffer locally and are never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    /// Session error or close. Playback is stopped until the next `play()`.
    Connection,
    /// The session rejected a weight update. Playback is paused.
    Publish,
    /// Nothing left to forward. Retracted by a matching `errorCleared`.
    NoActivePrompts,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to music service: {0}")]
    Connect(String),
    #[error("music service did not complete setup within {0} ms")]
    SetupTimeout(u64),
    #[error("no api key configured; set `session.api_key` or ${0}")]
    MissingApiKey(String),
    #[error("weighted prompts rejected: {0}")]
    Rejected(String),
    #[error("session is closed")]
    Closed,
    #[error("failed to encode session message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pcm payload of {len} bytes is not a whole number of {frame_bytes}-byte frames")]
    Misaligned { len: usize, frame_bytes: usize },
    #[error("unsupported channel count {0}")]
    Channels(usize),
    #[error("empty audio payload")]
    Empty,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("playback engine has shut down")]
    Closed,
}

impl<T> From<flume::SendError<T>> for EngineError {
    fn from(_: flume::SendError<T>) -> Self {
        Self::Closed
    }
}
