//! Low-pass filter effect.

use serde::{Deserialize, Serialize};

use super::biquad::{BiquadFilter, BiquadKind, FilterSettings};
use super::{EffectContext, SubmixEffect};

/// Cutoff settings for the low-pass filter.
pub type LowPassFilterSettings = FilterSettings;

/// Configured low-pass filter with per-channel history.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassFilterEffect {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: LowPassFilterSettings,
    #[serde(skip, default = "low_pass_filter")]
    filter: BiquadFilter,
}

fn low_pass_filter() -> BiquadFilter {
    BiquadFilter::new(BiquadKind::LowPass)
}

impl LowPassFilterEffect {
    pub fn new(settings: LowPassFilterSettings) -> Self {
        Self {
            enabled: true,
            settings,
            filter: low_pass_filter(),
        }
    }
}

impl std::fmt::Debug for LowPassFilterEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowPassFilterEffect")
            .field("enabled", &self.enabled)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for LowPassFilterEffect {
    fn default() -> Self {
        Self {
            enabled: false,
            settings: LowPassFilterSettings::default(),
            filter: low_pass_filter(),
        }
    }
}

impl SubmixEffect for LowPassFilterEffect {
    fn name(&self) -> &str {
        "low_pass"
    }

    fn process(&mut self, samples: &mut [f32], context: &EffectContext) {
        if !self.enabled {
            return;
        }
        self.filter.prepare(&self.settings, context);
        self.filter.process(samples);
    }

    fn reset_state(&mut self) {
        self.filter.reset();
    }

    fn warm_up(&mut self, context: &EffectContext) {
        self.filter.prepare(&self.settings, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EffectContext {
        EffectContext::new(48_000, 2)
    }

    #[test]
    fn low_pass_disabled_passthrough() {
        let mut effect = LowPassFilterEffect::default();
        let mut samples = vec![0.1_f32, -0.1, 0.2, -0.2];
        let expected = samples.clone();
        effect.process(&mut samples, &context());
        assert_eq!(samples, expected);
    }

    #[test]
    fn low_pass_attenuates_nyquist_tone() {
        let mut effect = LowPassFilterEffect::new(LowPassFilterSettings::new(200, 0.707));
        let mut samples: Vec<f32> = (0..2048)
            .map(|i| if (i / 2) % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        effect.process(&mut samples, &context());
        let tail_peak = samples[1024..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(tail_peak < 0.01, "peak {tail_peak}");
        assert!(samples.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn reset_clears_history() {
        let mut effect = LowPassFilterEffect::new(LowPassFilterSettings::default());
        let mut warm = vec![1.0_f32; 64];
        effect.process(&mut warm, &context());
        effect.reset_state();

        let mut silence = vec![0.0_f32; 8];
        effect.process(&mut silence, &context());
        assert!(silence.iter().all(|s| *s == 0.0));
    }
}
