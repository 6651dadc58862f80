//! FFT magnitude analyzer fed with mono audio from a submix.
//!
//! Audio is pushed into a fixed history ring. Whenever at least one hop of
//! new samples has arrived, [`SpectrumAnalyzer::perform_analysis_if_possible`]
//! windows the latest `fft_size` samples and refreshes the magnitude bins.

use dasp_ring_buffer::Fixed;
use serde::{Deserialize, Serialize};

const DEFAULT_FFT_SIZE: usize = 1024;

/// Analysis window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumSettings {
    /// Window length in samples, rounded up to a power of two.
    pub fft_size: usize,
    /// New samples required between analyses. Zero means half the window.
    pub hop_size: usize,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            hop_size: DEFAULT_FFT_SIZE / 2,
        }
    }
}

impl SpectrumSettings {
    fn resolved(self) -> (usize, usize) {
        let fft_size = self.fft_size.clamp(16, 1 << 16).next_power_of_two();
        let hop = match self.hop_size {
            0 => fft_size / 2,
            hop => hop.min(fft_size),
        };
        (fft_size, hop)
    }
}

#[cfg(feature = "real-fft")]
mod engine {
    use realfft::num_complex::Complex;
    use realfft::{RealFftPlanner, RealToComplex};
    use std::sync::Arc;

    pub(super) struct FftEngine {
        r2c: Arc<dyn RealToComplex<f32>>,
        input: Vec<f32>,
        spectrum: Vec<Complex<f32>>,
        scratch: Vec<Complex<f32>>,
    }

    impl FftEngine {
        pub(super) fn new(fft_size: usize) -> Self {
            let mut planner = RealFftPlanner::<f32>::new();
            let r2c = planner.plan_fft_forward(fft_size);
            let input = r2c.make_input_vec();
            let spectrum = r2c.make_output_vec();
            let scratch = r2c.make_scratch_vec();
            Self {
                r2c,
                input,
                spectrum,
                scratch,
            }
        }

        pub(super) fn input_mut(&mut self) -> &mut [f32] {
            &mut self.input
        }

        /// Transform the input and write `|X[k]|` for the first half of the
        /// spectrum into `out`.
        pub(super) fn magnitudes(&mut self, out: &mut [f32]) -> bool {
            if self
                .r2c
                .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
                .is_err()
            {
                return false;
            }
            for (dst, bin) in out.iter_mut().zip(&self.spectrum) {
                *dst = bin.norm();
            }
            true
        }
    }
}

#[cfg(not(feature = "real-fft"))]
mod engine {
    use rustfft::num_complex::Complex;
    use rustfft::{Fft, FftPlanner};
    use std::sync::Arc;

    pub(super) struct FftEngine {
        fft: Arc<dyn Fft<f32>>,
        input: Vec<f32>,
        buffer: Vec<Complex<f32>>,
        scratch: Vec<Complex<f32>>,
    }

    impl FftEngine {
        pub(super) fn new(fft_size: usize) -> Self {
            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(fft_size);
            let scratch = vec![Complex { re: 0.0, im: 0.0 }; fft.get_inplace_scratch_len()];
            Self {
                fft,
                input: vec![0.0; fft_size],
                buffer: vec![Complex { re: 0.0, im: 0.0 }; fft_size],
                scratch,
            }
        }

        pub(super) fn input_mut(&mut self) -> &mut [f32] {
            &mut self.input
        }

        pub(super) fn magnitudes(&mut self, out: &mut [f32]) -> bool {
            for (dst, sample) in self.buffer.iter_mut().zip(&self.input) {
                *dst = Complex { re: *sample, im: 0.0 };
            }
            self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
            for (dst, bin) in out.iter_mut().zip(&self.buffer) {
                *dst = bin.norm();
            }
            true
        }
    }
}

/// Hann-windowed magnitude spectrum of the most recent audio.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    window_gain: f32,
    history: Fixed<Vec<f32>>,
    pending: usize,
    magnitudes: Vec<f32>,
    has_result: bool,
    engine: engine::FftEngine,
}

impl SpectrumAnalyzer {
    pub fn new(settings: SpectrumSettings, sample_rate: u32) -> Self {
        let (fft_size, hop_size) = settings.resolved();
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        let window_gain = window.iter().sum::<f32>().max(f32::MIN_POSITIVE);
        Self {
            sample_rate,
            fft_size,
            hop_size,
            window,
            window_gain,
            history: Fixed::from(vec![0.0; fft_size]),
            pending: 0,
            magnitudes: vec![0.0; fft_size / 2 + 1],
            has_result: false,
            engine: engine::FftEngine::new(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Append mono samples to the analysis history.
    pub fn push_audio(&mut self, mono: &[f32]) {
        for sample in mono {
            self.history.push(*sample);
        }
        self.pending = self.pending.saturating_add(mono.len());
    }

    /// Run one FFT if a full hop of new audio is available.
    pub fn perform_analysis_if_possible(&mut self) -> bool {
        if self.pending < self.hop_size {
            return false;
        }
        let input = self.engine.input_mut();
        for ((dst, sample), w) in input.iter_mut().zip(self.history.iter()).zip(&self.window) {
            *dst = *sample * *w;
        }
        if !self.engine.magnitudes(&mut self.magnitudes) {
            log::warn!("spectrum analysis failed for a {} point window", self.fft_size);
            return false;
        }
        // Single-sided amplitude: a full-scale sine reads as 1.0.
        let scale = 2.0 / self.window_gain;
        for bin in self.magnitudes.iter_mut() {
            *bin *= scale;
        }
        self.pending = 0;
        self.has_result = true;
        true
    }

    /// Latest magnitude per bin, or `None` before the first analysis.
    pub fn magnitudes(&self) -> Option<&[f32]> {
        self.has_result.then_some(self.magnitudes.as_slice())
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Magnitude at `hz`, linearly interpolated between the nearest bins.
    pub fn band_magnitude(&self, hz: f32) -> f32 {
        if !self.has_result || !hz.is_finite() || hz < 0.0 {
            return 0.0;
        }
        let position = hz / self.bin_hz();
        let lower = position.floor() as usize;
        let last = self.magnitudes.len() - 1;
        if lower >= last {
            return self.magnitudes[last];
        }
        let frac = position - lower as f32;
        self.magnitudes[lower] * (1.0 - frac) + self.magnitudes[lower + 1] * frac
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("hop_size", &self.hop_size)
            .finish()
    }
}
