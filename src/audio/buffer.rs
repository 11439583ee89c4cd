/// A decoded, immutable block of interleaved `f32` PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
}

impl PcmBuffer {
    /// `samples.len()` must be a multiple of `channels`; a trailing partial
    /// frame is truncated.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn silence(frames: usize, sample_rate: u32, channels: usize) -> Self {
        Self::new(vec![0.0; frames * channels.max(1)], sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample `channel` of frame `frame`, mapping missing channels to the
    /// first one (mono sources feed both sides).
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channel = if channel < self.channels { channel } else { 0 };
        self.samples[frame * self.channels + channel]
    }
}
