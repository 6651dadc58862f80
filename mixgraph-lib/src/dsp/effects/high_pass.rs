//! High-pass filter effect.

use serde::{Deserialize, Serialize};

use super::biquad::{BiquadFilter, BiquadKind, FilterSettings};
use super::{EffectContext, SubmixEffect};

/// Cutoff settings for the high-pass filter.
pub type HighPassFilterSettings = FilterSettings;

/// Configured high-pass filter with per-channel history.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighPassFilterEffect {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: HighPassFilterSettings,
    #[serde(skip, default = "high_pass_filter")]
    filter: BiquadFilter,
}

fn high_pass_filter() -> BiquadFilter {
    BiquadFilter::new(BiquadKind::HighPass)
}

impl HighPassFilterEffect {
    pub fn new(settings: HighPassFilterSettings) -> Self {
        Self {
            enabled: true,
            settings,
            filter: high_pass_filter(),
        }
    }
}

impl std::fmt::Debug for HighPassFilterEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighPassFilterEffect")
            .field("enabled", &self.enabled)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for HighPassFilterEffect {
    fn default() -> Self {
        Self {
            enabled: false,
            settings: HighPassFilterSettings::default(),
            filter: high_pass_filter(),
        }
    }
}

impl SubmixEffect for HighPassFilterEffect {
    fn name(&self) -> &str {
        "high_pass"
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
    fn high_pass_disabled_passthrough() {
        let mut effect = HighPassFilterEffect::default();
        let mut samples = vec![0.1_f32, -0.1, 0.2, -0.2];
        let expected = samples.clone();
        effect.process(&mut samples, &context());
        assert_eq!(samples, expected);
    }

    #[test]
    fn high_pass_blocks_dc_offset() {
        let mut effect = HighPassFilterEffect::new(HighPassFilterSettings::new(200, 0.707));
        let mut samples = vec![0.5_f32; 4096];
        effect.process(&mut samples, &context());
        assert!(samples[4094].abs() < 1e-3);
        assert!(samples[4095].abs() < 1e-3);
        assert!(samples.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn reset_clears_history() {
        let mut effect = HighPassFilterEffect::new(HighPassFilterSettings::default());
        let mut warm = vec![1.0_f32; 64];
        effect.process(&mut warm, &context());
        effect.reset_state();

        let mut silence = vec![0.0_f32; 8];
        effect.process(&mut silence, &context());
        assert!(silence.iter().all(|s| *s == 0.0));
    }
}
