//! DSP building blocks: buffer math, faders, envelope following, spectrum
//! analysis and the built-in effects.

pub mod buffer;
pub mod effects;
pub mod envelope;
pub mod fader;
pub mod level;
pub mod spectrum;
