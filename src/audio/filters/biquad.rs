use std::f64::consts::PI;

/// Biquad filter coefficients (normalized by a0).
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadCoeffs {
  pub b0: f64,
  pub b1: f64,
  pub b2: f64,
  pub a1: f64,
  pub a2: f64,
}

/// Per-channel biquad filter state (Direct Form I).
#[derive(Debug, Clone, Default)]
pub struct BiquadState {
  pub x1: f64,
  pub x2: f64,
  pub y1: f64,
  pub y2: f64,
}

impl BiquadCoeffs {
  /// RBJ high-shelf. `gain_db` applies above `freq`; 0 dB is an exact
  /// passthrough.
  pub fn high_shelf(freq: f64, gain_db: f64, slope: f64, sample_rate: f64) -> Self {
    let a = 10f64.powf(gain_db / 40.0);
    let omega0 = 2.0 * PI * freq / sample_rate;
    let sin_omega0 = omega0.sin();
    let cos_omega0 = omega0.cos();
    let alpha = sin_omega0 / 2.0 * ((a + 1.0 / a) * (1.0 / slope - 1.0) + 2.0).sqrt();
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let a0 = (a + 1.0) - (a - 1.0) * cos_omega0 + two_sqrt_a_alpha;
    let inv_a0 = 1.0 / a0;
    Self {
      b0: a * ((a + 1.0) + (a - 1.0) * cos_omega0 + two_sqrt_a_alpha) * inv_a0,
      b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega0) * inv_a0,
      b2: a * ((a + 1.0) + (a - 1.0) * cos_omega0 - two_sqrt_a_alpha) * inv_a0,
      a1: 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega0) * inv_a0,
      a2: ((a + 1.0) - (a - 1.0) * cos_omega0 - two_sqrt_a_alpha) * inv_a0,
    }
  }
}

impl BiquadState {
  /// Process one sample through the biquad filter.
  pub fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
    let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
      - coeffs.a1 * self.y1
      - coeffs.a2 * self.y2;

    if !output.is_finite() {
      // Reset on NaN/Inf to avoid cascading errors
      self.reset();
      return 0.0;
    }

    self.x2 = self.x1;
    self.x1 = input;
    self.y2 = self.y1;
    self.y1 = output;
    output
  }

  pub fn reset(&mut self) {
    self.x1 = 0.0;
    self.x2 = 0.0;
    self.y1 = 0.0;
    self.y2 = 0.0;
  }
}
