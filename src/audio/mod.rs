pub mod automation;
pub mod buffer;
pub mod clock;
pub mod constants;
pub mod filters;
pub mod graph;
pub mod output;

pub use automation::{AudioParam, Ramp};
pub use buffer::PcmBuffer;
pub use clock::{AudioClock, InstantClock};
pub use graph::RenderGraph;
pub use output::{AudioSink, NullSink, OutputDriver, PcmWriterSink, open_sink};
