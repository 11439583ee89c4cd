//! Central constants for the audio graph.
//!
//! Tunable timings live in `configs::PlaybackConfig`; these are the fixed
//! numbers the graph relies on.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Sample rate the remote service streams at (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Interleaved stereo throughout the graph.
pub const DEFAULT_CHANNELS: usize = 2;

/// Frames per render quantum (20 ms at 48 kHz).
pub const RENDER_QUANTUM_FRAMES: usize = 960;

/// Bytes per interleaved L16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

// ── i16 PCM boundaries ───────────────────────────────────────────────────────

pub const INT16_MAX_F: f32 = 32_767.0;
pub const INT16_MIN_F: f32 = -32_768.0;
pub const INV_INT16: f32 = 1.0 / 32_768.0;

// ── Gain automation ──────────────────────────────────────────────────────────

/// Near-zero floor: fade-out target and fade-in origin.
pub const SILENT_GAIN: f32 = 0.000_1;

/// Unity gain.
pub const UNITY_GAIN: f32 = 1.0;

/// Shelf slope used by the tone-shaping stage.
pub const SHELF_SLOPE: f64 = 1.0;

// ── Metering ─────────────────────────────────────────────────────────────────

/// Blocks a metering tap may lag behind before new blocks are dropped.
pub const TAP_CAPACITY: usize = 32;
