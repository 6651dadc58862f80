//! Source voices: the leaves of the mixing graph.
//!
//! Each voice renders one block per callback into its own buffer (generator,
//! then the optional source effect chain, then the volume ramp). Submixes read
//! those buffers through their sends.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dsp::buffer::reset_to_silence;
use crate::dsp::effects::{AudioEffect, EffectContext};
use crate::dsp::fader::LevelRamp;
use crate::dsp::level::deserialize_linear_gain;
use crate::mixer::chain::EffectChain;
use crate::mixer::types::{RenderContext, SourceId};

/// Produces interleaved audio for one voice.
pub trait SourceGenerator: Send {
    /// Fill `out` (already silent) with `out.len() / channels` frames.
    fn render(&mut self, out: &mut [f32], channels: usize, sample_rate: u32);

    /// One-shot generators report `true` once exhausted.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Sine tone written to every channel.
#[derive(Debug, Clone)]
pub struct SineGenerator {
    frequency_hz: f32,
    amplitude: f32,
    phase: f32,
}

impl SineGenerator {
    pub fn new(frequency_hz: f32, amplitude: f32) -> Self {
        Self {
            frequency_hz,
            amplitude,
            phase: 0.0,
        }
    }
}

impl SourceGenerator for SineGenerator {
    fn render(&mut self, out: &mut [f32], channels: usize, sample_rate: u32) {
        let increment = std::f32::consts::TAU * self.frequency_hz / sample_rate.max(1) as f32;
        for frame in out.chunks_mut(channels.max(1)) {
            let value = self.phase.sin() * self.amplitude;
            frame.fill(value);
            self.phase = (self.phase + increment) % std::f32::consts::TAU;
        }
    }
}

/// Uniform white noise, independent per channel.
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    amplitude: f32,
    rng: StdRng,
}

impl NoiseGenerator {
    pub fn new(amplitude: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { amplitude, rng }
    }
}

impl SourceGenerator for NoiseGenerator {
    fn render(&mut self, out: &mut [f32], _channels: usize, _sample_rate: u32) {
        for sample in out.iter_mut() {
            *sample = self.rng.gen_range(-1.0_f32..=1.0) * self.amplitude;
        }
    }
}

/// Plays a prerecorded interleaved buffer, mapping its channels onto the
/// device channels (extra device channels repeat the last source channel).
#[derive(Debug, Clone)]
pub struct BufferGenerator {
    samples: Vec<f32>,
    channels: usize,
    position: usize,
    looping: bool,
}

impl BufferGenerator {
    pub fn new(samples: Vec<f32>, channels: usize, looping: bool) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            position: 0,
            looping,
        }
    }

    fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl SourceGenerator for BufferGenerator {
    fn render(&mut self, out: &mut [f32], channels: usize, _sample_rate: u32) {
        let total = self.frames();
        if total == 0 {
            return;
        }
        for frame in out.chunks_mut(channels.max(1)) {
            if self.position >= total {
                if !self.looping {
                    return;
                }
                self.position = 0;
            }
            let start = self.position * self.channels;
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.samples[start + ch.min(self.channels - 1)];
            }
            self.position += 1;
        }
    }

    fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.frames()
    }
}

/// Serializable generator description used by graph files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Sine {
        frequency_hz: f32,
        #[serde(default = "unit_gain", deserialize_with = "deserialize_linear_gain")]
        amplitude: f32,
    },
    Noise {
        #[serde(default = "unit_gain", deserialize_with = "deserialize_linear_gain")]
        amplitude: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    Samples {
        samples: Vec<f32>,
        #[serde(default = "mono")]
        channels: usize,
        #[serde(default)]
        looping: bool,
    },
}

fn unit_gain() -> f32 {
    1.0
}

fn mono() -> usize {
    1
}

impl GeneratorConfig {
    pub fn build(&self) -> Box<dyn SourceGenerator> {
        match self {
            GeneratorConfig::Sine {
                frequency_hz,
                amplitude,
            } => Box::new(SineGenerator::new(*frequency_hz, *amplitude)),
            GeneratorConfig::Noise { amplitude, seed } => {
                Box::new(NoiseGenerator::new(*amplitude, *seed))
            }
            GeneratorConfig::Samples {
                samples,
                channels,
                looping,
            } => Box::new(BufferGenerator::new(samples.clone(), *channels, *looping)),
        }
    }
}

/// Initial state of a new source voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub volume: f32,
    pub effects: Vec<AudioEffect>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            effects: Vec::new(),
        }
    }
}

/// One playing source, owned by the render thread.
pub struct SourceVoice {
    id: SourceId,
    generator: Box<dyn SourceGenerator>,
    volume: LevelRamp,
    chain: EffectChain,
    output: Vec<f32>,
}

impl SourceVoice {
    /// Build a voice on the control thread with scratch for `max_samples`.
    pub fn new(
        id: SourceId,
        generator: Box<dyn SourceGenerator>,
        settings: SourceSettings,
        context: &EffectContext,
        max_samples: usize,
    ) -> Self {
        let mut chain = EffectChain::from_effects(settings.effects);
        chain.warm_up(context);
        Self {
            id,
            generator,
            volume: LevelRamp::new(settings.volume),
            chain,
            output: Vec::with_capacity(max_samples),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume.set_target(volume);
    }

    pub fn is_finished(&self) -> bool {
        self.generator.is_finished()
    }

    fn render(&mut self, ctx: &RenderContext) {
        reset_to_silence(&mut self.output, ctx.samples());
        self.generator
            .render(&mut self.output, ctx.channels, ctx.sample_rate);
        if !self.chain.is_empty() {
            let effect_ctx = EffectContext::new(ctx.sample_rate, ctx.channels);
            self.chain.process(&mut self.output, &effect_ctx);
        }
        self.volume.apply(&mut self.output, ctx.channels);
    }
}

impl std::fmt::Debug for SourceVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceVoice")
            .field("id", &self.id)
            .field("volume", &self.volume.target())
            .field("chain", &self.chain)
            .finish()
    }
}

/// Render-thread registry of source voices.
#[derive(Debug, Default)]
pub struct SourceManager {
    voices: HashMap<SourceId, Box<SourceVoice>>,
}

impl SourceManager {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voices: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, voice: Box<SourceVoice>) -> Option<Box<SourceVoice>> {
        self.voices.insert(voice.id(), voice)
    }

    pub fn remove(&mut self, id: SourceId) -> Option<Box<SourceVoice>> {
        self.voices.remove(&id)
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut SourceVoice> {
        self.voices.get_mut(&id).map(|voice| voice.as_mut())
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Render one block for every voice.
    pub fn compute_next_block(&mut self, ctx: &RenderContext) {
        for voice in self.voices.values_mut() {
            voice.render(ctx);
        }
    }

    /// Audio rendered this callback by `id`, or `None` if the source is gone.
    pub fn output(&self, id: SourceId) -> Option<&[f32]> {
        self.voices.get(&id).map(|voice| voice.output.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::types::RenderSettings;

    fn ctx(frames: usize) -> RenderContext {
        RenderContext {
            sample_rate: 48_000,
            channels: 2,
            frames,
            audio_clock: 0.0,
            settings: RenderSettings::default(),
        }
    }

    fn voice(id: u32, generator: Box<dyn SourceGenerator>, volume: f32) -> Box<SourceVoice> {
        Box::new(SourceVoice::new(
            SourceId(id),
            generator,
            SourceSettings {
                volume,
                effects: Vec::new(),
            },
            &EffectContext::new(48_000, 2),
            64,
        ))
    }

    #[test]
    fn sine_writes_same_value_to_each_channel() {
        let mut sine = SineGenerator::new(1_000.0, 0.5);
        let mut out = vec![0.0_f32; 16];
        sine.render(&mut out, 2, 48_000);
        assert_eq!(out[0], 0.0);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0].abs() <= 0.5);
        }
    }

    #[test]
    fn seeded_noise_is_repeatable_and_bounded() {
        let mut a = NoiseGenerator::new(0.25, Some(7));
        let mut b = NoiseGenerator::new(0.25, Some(7));
        let mut out_a = vec![0.0_f32; 32];
        let mut out_b = vec![0.0_f32; 32];
        a.render(&mut out_a, 2, 48_000);
        b.render(&mut out_b, 2, 48_000);
        assert_eq!(out_a, out_b);
        assert!(out_a.iter().all(|s| s.abs() <= 0.25));
    }

    #[test]
    fn one_shot_buffer_finishes_with_silence() {
        let mut generator = BufferGenerator::new(vec![0.1, 0.2, 0.3], 1, false);
        let mut out = vec![0.0_f32; 8];
        generator.render(&mut out, 2, 48_000);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
        assert!(generator.is_finished());
    }

    #[test]
    fn looping_buffer_wraps() {
        let mut generator = BufferGenerator::new(vec![1.0, -1.0], 1, true);
        let mut out = vec![0.0_f32; 5];
        generator.render(&mut out, 1, 48_000);
        assert_eq!(out, vec![1.0, -1.0, 1.0, -1.0, 1.0]);
        assert!(!generator.is_finished());
    }

    #[test]
    fn manager_applies_volume_and_drops_removed_sources() {
        let mut manager = SourceManager::default();
        manager.insert(voice(
            1,
            Box::new(BufferGenerator::new(vec![1.0], 1, true)),
            0.5,
        ));
        manager.compute_next_block(&ctx(4));
        assert_eq!(manager.output(SourceId(1)), Some(&[0.5_f32; 8][..]));

        assert!(manager.remove(SourceId(1)).is_some());
        assert!(manager.output(SourceId(1)).is_none());
    }

    #[test]
    fn generator_config_parses_db_amplitude() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"type":"sine","frequency_hz":220,"amplitude":"-6db"}"#)
                .unwrap();
        match config {
            GeneratorConfig::Sine { amplitude, .. } => assert!((amplitude - 0.501).abs() < 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
