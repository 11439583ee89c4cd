use serde::Deserialize;

use crate::{common::errors::EngineError, playback::EngineHandle, protocol::Prompt};

/// Ops accepted from a control client.
#[derive(Deserialize, Debug)]
#[serde(tag = "op")]
#[serde(rename_all = "camelCase")]
pub enum IncomingMessage {
    /// Without `prompts`, the engine's current set is replayed.
    Play {
        #[serde(default)]
        prompts: Option<Vec<Prompt>>,
    },
    Pause,
    Stop,
    PlayPause {
        #[serde(default)]
        prompts: Option<Vec<Prompt>>,
    },
    SetWeightedPrompts {
        prompts: Vec<Prompt>,
    },
    SetMasterVolume {
        volume: f32,
    },
    SetFadeEnabled {
        enabled: bool,
    },
}

pub async fn handle_op(op: IncomingMessage, engine: &EngineHandle) -> Result<(), EngineError> {
    match op {
        IncomingMessage::Play { prompts } => {
            let prompts = current_or(prompts, engine).await?;
            engine.play(prompts).await
        }
        IncomingMessage::Pause => engine.pause().await,
        IncomingMessage::Stop => engine.stop().await,
        IncomingMessage::PlayPause { prompts } => {
            let prompts = current_or(prompts, engine).await?;
            engine.play_pause(prompts).await
        }
        IncomingMessage::SetWeightedPrompts { prompts } => engine.set_weighted_prompts(prompts).await,
        IncomingMessage::SetMasterVolume { volume } => engine.set_master_volume(volume).await,
        IncomingMessage::SetFadeEnabled { enabled } => engine.set_fade_enabled(enabled).await,
    }
}

async fn current_or(
    prompts: Option<Vec<Prompt>>,
    engine: &EngineHandle,
) -> Result<Vec<Prompt>, EngineError> {
    match prompts {
        Some(prompts) => Ok(prompts),
        None => Ok(engine.snapshot().await?.prompts),
    }
}
