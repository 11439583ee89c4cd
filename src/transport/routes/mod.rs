pub mod status;

pub use status::{get_prompts, get_status};
