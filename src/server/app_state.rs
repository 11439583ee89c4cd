use crate::{configs::Config, playback::EngineHandle, protocol::Prompt};

/// Top-level application state shared by every route.
pub struct AppState {
    pub engine: EngineHandle,
    pub config: Config,
    /// The prompt set the engine was started with.
    pub deck: Vec<Prompt>,
}
