//! Peak envelope follower with separate attack and release times.

use serde::{Deserialize, Serialize};

const DEFAULT_ATTACK_MS: f32 = 10.0;
const DEFAULT_RELEASE_MS: f32 = 100.0;

/// Attack and release times for envelope following.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSettings {
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            attack_ms: DEFAULT_ATTACK_MS,
            release_ms: DEFAULT_RELEASE_MS,
        }
    }
}

/// One-pole smoother over rectified samples.
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack_coeff: f32,
    release_coeff: f32,
    value: f32,
}

impl EnvelopeFollower {
    pub fn new(settings: EnvelopeSettings, sample_rate: u32) -> Self {
        Self {
            attack_coeff: time_coeff(settings.attack_ms, sample_rate),
            release_coeff: time_coeff(settings.release_ms, sample_rate),
            value: 0.0,
        }
    }

    /// Feed one sample and return the updated envelope.
    pub fn process(&mut self, sample: f32) -> f32 {
        let level = sample.abs();
        let coeff = if level > self.value {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.value = level + coeff * (self.value - level);
        self.value
    }

    /// Feed every `channels`-th sample starting at `channel`.
    pub fn process_channel(&mut self, interleaved: &[f32], channel: usize, channels: usize) -> f32 {
        for sample in interleaved.iter().skip(channel).step_by(channels.max(1)) {
            self.process(*sample);
        }
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

fn time_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = time_ms.max(0.0) * 0.001 * sample_rate as f32;
    if samples < 1.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rises_toward_constant_input() {
        let mut env = EnvelopeFollower::new(EnvelopeSettings::default(), 48_000);
        for _ in 0..48_000 {
            env.process(-0.5);
        }
        assert!((env.value() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn release_is_slower_than_attack() {
        let settings = EnvelopeSettings {
            attack_ms: 1.0,
            release_ms: 200.0,
        };
        let mut env = EnvelopeFollower::new(settings, 48_000);
        for _ in 0..480 {
            env.process(1.0);
        }
        let peak = env.value();
        assert!(peak > 0.99);
        for _ in 0..480 {
            env.process(0.0);
        }
        assert!(env.value() > 0.9 * peak);
    }

    #[test]
    fn zero_times_track_instantly() {
        let settings = EnvelopeSettings {
            attack_ms: 0.0,
            release_ms: 0.0,
        };
        let mut env = EnvelopeFollower::new(settings, 48_000);
        assert_eq!(env.process(0.8), 0.8);
        assert_eq!(env.process(0.1), 0.1);
    }

    #[test]
    fn channel_view_reads_only_its_samples() {
        let mut env = EnvelopeFollower::new(
            EnvelopeSettings {
                attack_ms: 0.0,
                release_ms: 0.0,
            },
            48_000,
        );
        let value = env.process_channel(&[0.0, 0.9, 0.0, 0.7], 1, 2);
        assert_eq!(value, 0.7);
    }
}
