//! Static gain stage.

use serde::{Deserialize, Serialize};

use super::{EffectContext, SubmixEffect};
use crate::dsp::buffer::multiply_in_place;
use crate::dsp::level::deserialize_linear_gain;

const DEFAULT_GAIN: f32 = 1.0;

/// Serialized configuration for gain parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSettings {
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub gain: f32,
}

impl GainSettings {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl Default for GainSettings {
    fn default() -> Self {
        Self { gain: DEFAULT_GAIN }
    }
}

/// Configured gain effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GainEffect {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: GainSettings,
}

impl GainEffect {
    pub fn new(gain: f32) -> Self {
        Self {
            enabled: true,
            settings: GainSettings::new(gain),
        }
    }
}

impl SubmixEffect for GainEffect {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&mut self, samples: &mut [f32], _context: &EffectContext) {
        if !self.enabled {
            return;
        }
        multiply_in_place(samples, sanitize_gain(self.settings.gain));
    }

    fn reset_state(&mut self) {}
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain
    } else {
        DEFAULT_GAIN
    }
}
