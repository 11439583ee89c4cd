pub mod audio;
pub mod common;
pub mod configs;
pub mod decoder;
pub mod playback;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
