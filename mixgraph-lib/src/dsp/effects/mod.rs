//! Chainable in-place effects for submix and source effect chains.
//!
//! Anything implementing [`SubmixEffect`] can sit in a chain. The built-in
//! effects are also available as the serde-tagged [`AudioEffect`] enum so that
//! graph descriptions can list them in JSON.

use serde::{Deserialize, Serialize};

mod biquad;
pub mod distortion;
pub mod gain;
pub mod high_pass;
pub mod identity;
pub mod low_pass;

pub use distortion::{DistortionEffect, DistortionSettings};
pub use gain::{GainEffect, GainSettings};
pub use high_pass::{HighPassFilterEffect, HighPassFilterSettings};
pub use identity::IdentityEffect;
pub use low_pass::{LowPassFilterEffect, LowPassFilterSettings};

/// Render environment handed to every effect call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectContext {
    pub sample_rate: u32,
    pub channels: usize,
}

impl EffectContext {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Contract for one stage of an effect chain.
///
/// `process` runs on the render thread and must not block. Any allocation the
/// effect needs should happen in `warm_up`, which is called on the control
/// thread before the chain is shipped to the renderer.
pub trait SubmixEffect: Send {
    /// Short display name used in logs.
    fn name(&self) -> &str;

    /// Process interleaved samples in place.
    fn process(&mut self, samples: &mut [f32], context: &EffectContext);

    /// Clear filter history and similar runtime state.
    fn reset_state(&mut self);

    /// Prepare runtime state for the given context.
    fn warm_up(&mut self, _context: &EffectContext) {}
}

/// Built-in effect configured from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AudioEffect {
    #[serde(rename = "IdentitySettings")]
    Identity(IdentityEffect),
    #[serde(rename = "GainSettings")]
    Gain(GainEffect),
    #[serde(rename = "LowPassFilterSettings")]
    LowPassFilter(LowPassFilterEffect),
    #[serde(rename = "HighPassFilterSettings")]
    HighPassFilter(HighPassFilterEffect),
    #[serde(rename = "DistortionSettings")]
    Distortion(DistortionEffect),
}

impl AudioEffect {
    fn inner_mut(&mut self) -> &mut dyn SubmixEffect {
        match self {
            AudioEffect::Identity(effect) => effect,
            AudioEffect::Gain(effect) => effect,
            AudioEffect::LowPassFilter(effect) => effect,
            AudioEffect::HighPassFilter(effect) => effect,
            AudioEffect::Distortion(effect) => effect,
        }
    }

    /// Box the effect for use in a chain.
    pub fn boxed(self) -> Box<dyn SubmixEffect> {
        Box::new(self)
    }
}

impl SubmixEffect for AudioEffect {
    fn name(&self) -> &str {
        match self {
            AudioEffect::Identity(effect) => effect.name(),
            AudioEffect::Gain(effect) => effect.name(),
            AudioEffect::LowPassFilter(effect) => effect.name(),
            AudioEffect::HighPassFilter(effect) => effect.name(),
            AudioEffect::Distortion(effect) => effect.name(),
        }
    }

    fn process(&mut self, samples: &mut [f32], context: &EffectContext) {
        self.inner_mut().process(samples, context);
    }

    fn reset_state(&mut self) {
        self.inner_mut().reset_state();
    }

    fn warm_up(&mut self, context: &EffectContext) {
        self.inner_mut().warm_up(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_effect_serde_roundtrip_variants() {
        let effects = vec![
            AudioEffect::Identity(IdentityEffect),
            AudioEffect::Gain(GainEffect::default()),
            AudioEffect::LowPassFilter(LowPassFilterEffect::default()),
            AudioEffect::HighPassFilter(HighPassFilterEffect::default()),
            AudioEffect::Distortion(DistortionEffect::default()),
        ];

        let json = serde_json::to_string(&effects).expect("serialize effects");
        let decoded: Vec<AudioEffect> = serde_json::from_str(&json).expect("deserialize effects");
        let names: Vec<&str> = decoded.iter().map(|effect| effect.name()).collect();
        assert_eq!(
            names,
            vec!["identity", "gain", "low_pass", "high_pass", "distortion"]
        );
    }

    #[test]
    fn audio_effect_serde_accepts_aliases() {
        let json = r#"
        [
            {"IdentitySettings":null},
            {"LowPassFilterSettings":{"enabled":true,"freq":800,"bandwidth":0.7}},
            {"HighPassFilterSettings":{"enabled":true,"frequency_hz":1200,"q":0.9}},
            {"DistortionSettings":{"enabled":true,"gain":2.0,"threshold":0.4}},
            {"GainSettings":{"enabled":true,"gain":"-6db"}}
        ]
        "#;

        let decoded: Vec<AudioEffect> = serde_json::from_str(json).expect("deserialize effects");
        assert_eq!(decoded.len(), 5);
    }

    #[test]
    fn boxed_effect_processes_through_trait_object() {
        let mut gain = GainEffect::default();
        gain.enabled = true;
        gain.settings.gain = 0.5;
        let mut effect = AudioEffect::Gain(gain).boxed();
        let mut samples = [1.0_f32, -1.0];
        effect.process(&mut samples, &EffectContext::new(48_000, 2));
        assert_eq!(samples, [0.5, -0.5]);
    }
}
