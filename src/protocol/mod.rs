pub mod events;
pub mod opcodes;
pub mod prompts;

pub use events::{EngineEvent, OutgoingMessage};
pub use opcodes::{IncomingMessage, handle_op};
pub use prompts::{Prompt, default_deck};
