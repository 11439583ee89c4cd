use serde::{Deserialize, Serialize};

/// Where rendered audio goes.
#[derive(Debug, Deserialize, Serialize, Clone, Default, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputSinkKind {
    /// Render and discard (meters still see the audio).
    #[default]
    Null,
    /// Raw s16le on stdout, e.g. piped into `aplay -f S16_LE -r 48000 -c 2`.
    Stdout,
    /// Raw s16le appended to `output.path`.
    File,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    #[serde(default)]
    pub sink: OutputSinkKind,
    #[serde(default)]
    pub path: Option<String>,
    /// How far ahead of the audio clock blocks are rendered.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Driver wake-up period.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: OutputSinkKind::default(),
            path: None,
            latency_ms: default_latency_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_latency_ms() -> u64 {
    100
}

fn default_tick_ms() -> u64 {
    20
}
