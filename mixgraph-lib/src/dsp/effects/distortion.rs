//! Hard-clipping distortion.

use serde::{Deserialize, Serialize};

use super::{EffectContext, SubmixEffect};
use crate::dsp::level::deserialize_linear_gain;

const DEFAULT_GAIN: f32 = 1.0;
const DEFAULT_THRESHOLD: f32 = 1.0;

/// Drive and clip level for the distortion stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionSettings {
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub gain: f32,
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub threshold: f32,
}

impl DistortionSettings {
    pub fn new(gain: f32, threshold: f32) -> Self {
        Self { gain, threshold }
    }
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Drives the signal by `gain` and clips it at `±threshold`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionEffect {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: DistortionSettings,
}

impl SubmixEffect for DistortionEffect {
    fn name(&self) -> &str {
        "distortion"
    }

    fn process(&mut self, samples: &mut [f32], _context: &EffectContext) {
        if !self.enabled {
            return;
        }
        let gain = if self.settings.gain.is_finite() {
            self.settings.gain
        } else {
            DEFAULT_GAIN
        };
        let threshold = sanitize_threshold(self.settings.threshold);
        for sample in samples.iter_mut() {
            *sample = (*sample * gain).clamp(-threshold, threshold);
        }
    }

    fn reset_state(&mut self) {}
}

fn sanitize_threshold(threshold: f32) -> f32 {
    let t = threshold.abs();
    if !t.is_finite() || t <= f32::EPSILON {
        DEFAULT_THRESHOLD
    } else {
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EffectContext {
        EffectContext::new(44_100, 1)
    }

    #[test]
    fn distortion_disabled_passthrough() {
        let mut effect = DistortionEffect::default();
        let mut samples = vec![0.25_f32, -0.25, 1.5, -1.5];
        effect.process(&mut samples, &context());
        assert_eq!(samples, vec![0.25_f32, -0.25, 1.5, -1.5]);
    }

    #[test]
    fn distortion_clamps_output() {
        let mut effect = DistortionEffect {
            enabled: true,
            settings: DistortionSettings::new(2.0, 0.5),
        };
        let mut samples = vec![0.1_f32, 0.4, -0.4, 0.6, -0.6];
        effect.process(&mut samples, &context());
        assert_eq!(samples, vec![0.2_f32, 0.5, -0.5, 0.5, -0.5]);
    }

    #[test]
    fn zero_threshold_falls_back_to_full_scale() {
        assert_eq!(sanitize_threshold(0.0), DEFAULT_THRESHOLD);
        assert_eq!(sanitize_threshold(-0.25), 0.25);
    }
}
