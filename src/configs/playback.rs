use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and automation constants of the playback engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Look-ahead held before promoting `loading` to `playing`.
    #[serde(default = "default_buffer_time_secs")]
    pub buffer_time_secs: f64,
    #[serde(default = "default_true")]
    pub fade_enabled: bool,
    #[serde(default = "default_fade_secs")]
    pub fade_secs: f64,
    #[serde(default = "default_volume")]
    pub initial_volume: f32,
    #[serde(default = "default_volume_ramp_secs")]
    pub volume_ramp_secs: f64,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    #[serde(default)]
    pub tone: ToneShapingConfig,
}

/// High-shelf cut engaged while the trigger prompt is active.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToneShapingConfig {
    #[serde(default = "default_trigger_prompt")]
    pub trigger_prompt: String,
    #[serde(default = "default_cut_db")]
    pub cut_db: f32,
    #[serde(default = "default_shelf_hz")]
    pub shelf_hz: f64,
    #[serde(default = "default_tone_ramp_secs")]
    pub ramp_secs: f64,
}

impl PlaybackConfig {
    pub fn buffer_time(&self) -> Duration {
        seconds(self.buffer_time_secs)
    }

    pub fn fade_duration(&self) -> Duration {
        seconds(self.fade_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("playback.sample_rate must be positive".into());
        }
        if !(1..=8).contains(&self.channels) {
            return Err(format!(
                "playback.channels must be between 1 and 8, got {}",
                self.channels
            ));
        }
        if !(self.buffer_time_secs.is_finite() && self.buffer_time_secs > 0.0) {
            return Err(format!(
                "playback.buffer_time_secs must be positive, got {}",
                self.buffer_time_secs
            ));
        }
        for (name, secs) in [
            ("fade_secs", self.fade_secs),
            ("volume_ramp_secs", self.volume_ramp_secs),
            ("tone.ramp_secs", self.tone.ramp_secs),
        ] {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(format!("playback.{} must not be negative, got {}", name, secs));
            }
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(format!(
                "playback.initial_volume must be within 0..=1, got {}",
                self.initial_volume
            ));
        }
        if !self.tone.cut_db.is_finite() {
            return Err("playback.tone.cut_db must be finite".into());
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.tone.shelf_hz > 0.0 && self.tone.shelf_hz < nyquist) {
            return Err(format!(
                "playback.tone.shelf_hz must be between 0 and {} Hz, got {}",
                nyquist, self.tone.shelf_hz
            ));
        }
        Ok(())
    }
}

/// Negative or non-finite values collapse to zero.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_time_secs: default_buffer_time_secs(),
            fade_enabled: true,
            fade_secs: default_fade_secs(),
            initial_volume: default_volume(),
            volume_ramp_secs: default_volume_ramp_secs(),
            publish_interval_ms: default_publish_interval_ms(),
            tone: ToneShapingConfig::default(),
        }
    }
}

impl Default for ToneShapingConfig {
    fn default() -> Self {
        Self {
            trigger_prompt: default_trigger_prompt(),
            cut_db: default_cut_db(),
            shelf_hz: default_shelf_hz(),
            ramp_secs: default_tone_ramp_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> usize {
    2
}

fn default_buffer_time_secs() -> f64 {
    2.0
}

fn default_fade_secs() -> f64 {
    5.0
}

fn default_volume() -> f32 {
    1.0
}

fn default_volume_ramp_secs() -> f64 {
    0.05
}

fn default_publish_interval_ms() -> u64 {
    200
}

fn default_trigger_prompt() -> String {
    "Dystopian Industrial".to_string()
}

fn default_cut_db() -> f32 {
    -18.0
}

fn default_shelf_hz() -> f64 {
    3_000.0
}

fn default_tone_ramp_secs() -> f64 {
    0.5
}
