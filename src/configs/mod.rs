pub mod base;
pub mod logging;
pub mod output;
pub mod playback;
pub mod server;
pub mod session;

pub use base::*;
pub use logging::*;
pub use output::*;
pub use playback::*;
pub use server::*;
pub use session::*;
