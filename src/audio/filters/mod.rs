pub mod biquad;
pub mod tone;

pub use tone::ToneShaper;
