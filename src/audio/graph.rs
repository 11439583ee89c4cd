//! The render graph: scheduled sources → output gain → master gain → tone
//! shaping → destination, with metering taps on the final signal.
//!
//! The graph holds no scheduling policy. The engine decides where buffers go
//! and which automation runs; the graph only evaluates it when a block is
//! pulled by the output driver.

use std::sync::Arc;

use tracing::trace;

use super::{
    automation::AudioParam,
    buffer::PcmBuffer,
    constants::{TAP_CAPACITY, UNITY_GAIN},
    filters::ToneShaper,
};
use crate::configs::PlaybackConfig;

/// A decoded buffer pinned to an absolute start time.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub start: f64,
    pub buffer: Arc<PcmBuffer>,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.buffer.duration()
    }
}

pub struct RenderGraph {
    sample_rate: u32,
    channels: usize,
    /// Fade in/out stage.
    pub output_gain: AudioParam,
    /// User volume stage.
    pub master_gain: AudioParam,
    pub tone: ToneShaper,
    sources: Vec<ScheduledSource>,
    taps: Vec<flume::Sender<Arc<[f32]>>>,
}

impl RenderGraph {
    pub fn new(config: &PlaybackConfig) -> Self {
        let channels = config.channels.max(1);
        Self {
            sample_rate: config.sample_rate,
            channels,
            output_gain: AudioParam::new("outputGain", 0.0, 0.0, UNITY_GAIN),
            master_gain: AudioParam::new("masterGain", config.initial_volume, 0.0, UNITY_GAIN),
            tone: ToneShaper::new(config.tone.shelf_hz, config.sample_rate, channels),
            sources: Vec::new(),
            taps: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn schedule(&mut self, start: f64, buffer: Arc<PcmBuffer>) {
        trace!(
            "Scheduling {:.3}s source at t={:.3}",
            buffer.duration(),
            start
        );
        self.sources.push(ScheduledSource { start, buffer });
    }

    /// Drop every scheduled source.
    pub fn clear_sources(&mut self) -> usize {
        let dropped = self.sources.len();
        self.sources.clear();
        self.tone.reset();
        dropped
    }

    /// Drop sources that have not begun playing at `now`.
    pub fn flush_unstarted(&mut self, now: f64) -> usize {
        let before = self.sources.len();
        self.sources.retain(|s| s.start <= now);
        before - self.sources.len()
    }

    pub fn sources(&self) -> &[ScheduledSource] {
        &self.sources
    }

    /// Start times of scheduled sources, in scheduling order.
    pub fn scheduled_starts(&self) -> Vec<f64> {
        self.sources.iter().map(|s| s.start).collect()
    }

    /// Register a metering tap. Blocks are delivered non-blockingly; a tap
    /// that falls more than `TAP_CAPACITY` blocks behind misses blocks.
    pub fn add_tap(&mut self) -> flume::Receiver<Arc<[f32]>> {
        let (tx, rx) = flume::bounded(TAP_CAPACITY);
        self.taps.push(tx);
        rx
    }

    /// Render `frames` interleaved frames, the first one sounding at
    /// `start_time`.
    pub fn render(&mut self, start_time: f64, frames: usize) -> Vec<f32> {
        let channels = self.channels;
        let rate = self.sample_rate as f64;
        let mut block = vec![0.0f32; frames * channels];

        for source in &self.sources {
            let offset = ((source.start - start_time) * rate).round() as i64;
            let len = source.buffer.frames() as i64;
            let first = offset.max(0);
            let last = (offset + len).min(frames as i64);

            for frame in first..last {
                let src_frame = (frame - offset) as usize;
                let base = frame as usize * channels;
                for ch in 0..channels {
                    block[base + ch] += source.buffer.sample(src_frame, ch);
                }
            }
        }

        for (i, frame) in block.chunks_mut(channels).enumerate() {
            let t = start_time + i as f64 / rate;
            let gain = self.output_gain.value_at(t) * self.master_gain.value_at(t);
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }

        self.tone.process(&mut block, start_time);

        let block_end = start_time + frames as f64 / rate;
        self.sources.retain(|s| s.end() > block_end);

        if !self.taps.is_empty() {
            let shared: Arc<[f32]> = Arc::from(block.as_slice());
            self.taps.retain(|tap| {
                !matches!(
                    tap.try_send(shared.clone()),
                    Err(flume::TrySendError::Disconnected(_))
                )
            });
        }

        block
    }
}
