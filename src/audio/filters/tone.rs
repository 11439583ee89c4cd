use super::biquad::{BiquadCoeffs, BiquadState};
use crate::audio::{automation::AudioParam, constants::SHELF_SLOPE};

/// Smallest dB change that forces a coefficient refresh.
const COEFF_EPSILON_DB: f32 = 0.01;

/// High-shelf stage with an automatable gain in dB.
///
/// The gain is sampled once per processed block (control rate), which is
/// fine-grained enough for the half-second ramps driven by the publisher.
pub struct ToneShaper {
    pub gain_db: AudioParam,
    frequency: f64,
    sample_rate: f64,
    applied_db: f32,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

impl ToneShaper {
    pub fn new(frequency: f64, sample_rate: u32, channels: usize) -> Self {
        let sample_rate = sample_rate as f64;
        Self {
            gain_db: AudioParam::new("toneShelfDb", 0.0, -40.0, 40.0),
            frequency,
            sample_rate,
            applied_db: 0.0,
            coeffs: BiquadCoeffs::high_shelf(frequency, 0.0, SHELF_SLOPE, sample_rate),
            states: vec![BiquadState::default(); channels.max(1)],
        }
    }

    /// The dB value currently baked into the coefficients.
    pub fn applied_db(&self) -> f32 {
        self.applied_db
    }

    /// Filter an interleaved block whose first frame plays at `block_time`.
    pub fn process(&mut self, samples: &mut [f32], block_time: f64) {
        let db = self.gain_db.value_at(block_time);
        if (db - self.applied_db).abs() > COEFF_EPSILON_DB {
            self.coeffs =
                BiquadCoeffs::high_shelf(self.frequency, db as f64, SHELF_SLOPE, self.sample_rate);
            self.applied_db = db;
        }

        let channels = self.states.len();
        for frame in samples.chunks_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
                *sample = state.process(*sample as f64, &self.coeffs) as f32;
            }
        }
    }

    pub fn reset(&mut self) {
        for state in self.states.iter_mut() {
            state.reset();
        }
    }
}
