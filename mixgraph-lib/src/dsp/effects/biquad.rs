//! Second-order filter shared by the low-pass and high-pass effects.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::EffectContext;

pub(super) const DEFAULT_FREQ_HZ: u32 = 1000;
pub(super) const DEFAULT_Q: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum BiquadKind {
    LowPass,
    HighPass,
}

/// Cutoff and resonance shared by both filter effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    #[serde(alias = "freq", alias = "frequency_hz")]
    pub freq_hz: u32,
    #[serde(alias = "bandwidth")]
    pub q: f32,
}

impl FilterSettings {
    pub fn new(freq_hz: u32, q: f32) -> Self {
        Self { freq_hz, q }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            freq_hz: DEFAULT_FREQ_HZ,
            q: DEFAULT_Q,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Direct-form I history for every channel.
#[derive(Clone, Debug)]
struct History {
    x1: Vec<f32>,
    x2: Vec<f32>,
    y1: Vec<f32>,
    y2: Vec<f32>,
}

impl History {
    fn new(channels: usize) -> Self {
        Self {
            x1: vec![0.0; channels],
            x2: vec![0.0; channels],
            y1: vec![0.0; channels],
            y2: vec![0.0; channels],
        }
    }

    fn clear(&mut self) {
        for line in [&mut self.x1, &mut self.x2, &mut self.y1, &mut self.y2] {
            line.fill(0.0);
        }
    }
}

/// Filter runtime: coefficients are recomputed when the context or settings
/// change, history survives between calls.
#[derive(Clone, Debug)]
pub(super) struct BiquadFilter {
    kind: BiquadKind,
    key: Option<(u32, usize, u32, u32)>,
    coeffs: Coefficients,
    history: History,
}

impl BiquadFilter {
    pub(super) fn new(kind: BiquadKind) -> Self {
        Self {
            kind,
            key: None,
            coeffs: Coefficients {
                b0: 1.0,
                b1: 0.0,
                b2: 0.0,
                a1: 0.0,
                a2: 0.0,
            },
            history: History::new(0),
        }
    }

    /// Recompute coefficients if needed. Allocates only when the channel count
    /// changes.
    pub(super) fn prepare(&mut self, settings: &FilterSettings, context: &EffectContext) {
        let channels = context.channels.max(1);
        let freq = sanitize_freq(settings.freq_hz, context.sample_rate);
        let q = sanitize_q(settings.q);
        let key = (context.sample_rate, channels, freq, q.to_bits());
        if self.key == Some(key) {
            return;
        }
        if self.history.x1.len() != channels {
            self.history = History::new(channels);
        }
        self.coeffs = coefficients(self.kind, context.sample_rate, freq, q);
        self.key = Some(key);
    }

    pub(super) fn process(&mut self, samples: &mut [f32]) {
        let channels = self.history.x1.len();
        if channels == 0 {
            return;
        }
        let c = self.coeffs;
        let h = &mut self.history;
        for frame in samples.chunks_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let x = *sample;
                let y = c.b0 * x + c.b1 * h.x1[ch] + c.b2 * h.x2[ch]
                    - c.a1 * h.y1[ch]
                    - c.a2 * h.y2[ch];
                h.x2[ch] = h.x1[ch];
                h.x1[ch] = x;
                h.y2[ch] = h.y1[ch];
                h.y1[ch] = y;
                *sample = y;
            }
        }
    }

    pub(super) fn reset(&mut self) {
        self.history.clear();
    }
}

fn sanitize_freq(freq: u32, sample_rate: u32) -> u32 {
    let nyquist = sample_rate / 2;
    if nyquist <= 1 {
        return 1;
    }
    freq.clamp(1, nyquist - 1)
}

fn sanitize_q(q: f32) -> f32 {
    if q.is_finite() {
        q.clamp(0.1, 10.0)
    } else {
        DEFAULT_Q
    }
}

fn coefficients(kind: BiquadKind, sample_rate: u32, freq: u32, q: f32) -> Coefficients {
    let w0 = 2.0 * PI * freq as f32 / sample_rate.max(1) as f32;
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * q);
    let a0 = 1.0 + alpha;

    let (b0, b1) = match kind {
        BiquadKind::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0),
        BiquadKind::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0)),
    };

    Coefficients {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b0 / a0,
        a1: -2.0 * cos_w0 / a0,
        a2: (1.0 - alpha) / a0,
    }
}
