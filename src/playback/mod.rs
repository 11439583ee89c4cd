pub mod engine;
pub mod publisher;
pub mod scheduler;
pub mod state;
pub mod timer;

pub use engine::{Command, EngineHandle, EngineSnapshot, PlaybackEngine, SessionStatus, spawn};
pub use publisher::{PromptPublisher, Throttle};
pub use scheduler::{ChunkScheduler, Placement};
pub use state::{PlaybackState, PlaybackStateMachine};
pub use timer::TimerSlot;
