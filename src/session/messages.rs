use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{AudioChunk, FilteredPrompt, SessionEvent, WeightedPrompt};
use crate::configs::GenerationConfig;

/// Frames sent to the music service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup {
        model: String,
    },
    ClientContent {
        #[serde(rename = "weightedPrompts")]
        weighted_prompts: Vec<WeightedPrompt>,
    },
    MusicGenerationConfig(GenerationConfig),
    PlaybackControl(PlaybackControl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackControl {
    Play,
    Pause,
    Stop,
}

/// Frames received from the music service. Several fields may be set at once.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub filtered_prompt: Option<FilteredPrompt>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub audio_chunks: Vec<WireAudioChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAudioChunk {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(SessionEvent::SetupComplete);
        }
        if let Some(filtered) = self.filtered_prompt {
            events.push(SessionEvent::FilteredPrompt(filtered));
        }
        if let Some(content) = self.server_content {
            if !content.audio_chunks.is_empty() {
                let chunks = content
                    .audio_chunks
                    .into_iter()
                    .map(|c| AudioChunk {
                        data: Bytes::from(c.data),
                        mime_type: c.mime_type,
                    })
                    .collect();
                events.push(SessionEvent::AudioChunks(chunks));
            }
        }
        if let Some(warning) = self.warning {
            events.push(SessionEvent::Warning(warning));
        }
        events
    }
}
