//! Output staging between the mixer and a consumer (audio device or file).
//!
//! [`OutputBuffer`] owns the [`MixerDevice`]. Each [`OutputBuffer::mix_next_buffer`]
//! renders one device callback, converts it to the output sample format and
//! pushes it into a bounded ring that the consumer drains at its own pace.

use dasp_ring_buffer::Bounded;
use serde::{Deserialize, Serialize};

use crate::mixer::MixerDevice;

mod endpoint;

pub use endpoint::{AudioEndpoint, CaptureEndpoint, CaptureReader, EndpointBuffer};

/// Sample format delivered to the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    Float,
    Int16,
}

/// Scale, clamp to [-1, 1]. Non-finite input becomes silence.
pub fn to_float_sample(sample: f32, gain: f32) -> f32 {
    let value = sample * gain;
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

/// Scale by `gain * 32767`, clamp to ±32767 and truncate.
pub fn to_i16_sample(sample: f32, gain: f32) -> i16 {
    let value = sample * gain * 32767.0;
    if value.is_nan() {
        return 0;
    }
    value.clamp(-32767.0, 32767.0) as i16
}

enum Ring {
    Float(Bounded<Vec<f32>>),
    Int16(Bounded<Vec<i16>>),
}

impl Ring {
    fn len(&self) -> usize {
        match self {
            Ring::Float(ring) => ring.len(),
            Ring::Int16(ring) => ring.len(),
        }
    }

    fn max_len(&self) -> usize {
        match self {
            Ring::Float(ring) => ring.max_len(),
            Ring::Int16(ring) => ring.max_len(),
        }
    }
}

#[cfg(feature = "debug")]
#[derive(Debug)]
struct OutputStats {
    rendered: u64,
    skipped: u64,
    clipped: u64,
    last_log: std::time::Instant,
}

#[cfg(feature = "debug")]
impl OutputStats {
    fn new() -> Self {
        Self {
            rendered: 0,
            skipped: 0,
            clipped: 0,
            last_log: std::time::Instant::now(),
        }
    }

    fn maybe_log(&mut self, fill: usize, capacity: usize) {
        if self.last_log.elapsed().as_secs_f64() >= 1.0 {
            log::info!(
                "output rendered={} skipped={} clipped={} fill={}/{}",
                self.rendered,
                self.skipped,
                self.clipped,
                fill,
                capacity
            );
            self.last_log = std::time::Instant::now();
        }
    }
}

/// Ring-buffered output of one mixer device.
pub struct OutputBuffer {
    device: MixerDevice,
    format: SampleFormat,
    gain: f32,
    ring: Ring,
    scratch: Vec<f32>,
    #[cfg(feature = "debug")]
    stats: OutputStats,
}

impl OutputBuffer {
    /// Stage up to `callbacks` device callbacks.
    pub fn new(device: MixerDevice, format: SampleFormat, gain: f32, callbacks: usize) -> Self {
        let quantum = device.samples_per_callback().max(1);
        let capacity = quantum * callbacks.max(1);
        let ring = match format {
            SampleFormat::Float => Ring::Float(Bounded::from(vec![0.0; capacity])),
            SampleFormat::Int16 => Ring::Int16(Bounded::from(vec![0; capacity])),
        };
        Self {
            device,
            format,
            gain,
            ring,
            scratch: vec![0.0; quantum],
            #[cfg(feature = "debug")]
            stats: OutputStats::new(),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn device(&self) -> &MixerDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut MixerDevice {
        &mut self.device
    }

    /// Samples waiting to be consumed.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.ring.max_len().saturating_sub(self.ring.len())
    }

    /// Render one callback into the ring. Does nothing and returns `false`
    /// when the ring cannot hold a full callback.
    pub fn mix_next_buffer(&mut self) -> bool {
        if self.remaining() < self.scratch.len() {
            #[cfg(feature = "debug")]
            {
                self.stats.skipped += 1;
            }
            return false;
        }

        self.device.process_audio_stream(&mut self.scratch);

        #[cfg(feature = "debug")]
        {
            self.stats.rendered += 1;
            let gain = self.gain;
            self.stats.clipped += self
                .scratch
                .iter()
                .filter(|s| (**s * gain).abs() > 1.0)
                .count() as u64;
        }

        match &mut self.ring {
            Ring::Float(ring) => {
                for &sample in &self.scratch {
                    ring.push(to_float_sample(sample, self.gain));
                }
            }
            Ring::Int16(ring) => {
                for &sample in &self.scratch {
                    ring.push(to_i16_sample(sample, self.gain));
                }
            }
        }

        #[cfg(feature = "debug")]
        self.stats.maybe_log(self.ring.len(), self.ring.max_len());
        true
    }

    /// Keep rendering until the ring cannot take another callback. Returns
    /// the number of callbacks rendered.
    pub fn fill(&mut self) -> usize {
        let mut rendered = 0;
        while self.mix_next_buffer() {
            rendered += 1;
        }
        rendered
    }

    /// Move up to `out.len()` samples out as floats.
    pub fn pop_float(&mut self, out: &mut [f32]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            let sample = match &mut self.ring {
                Ring::Float(ring) => ring.pop(),
                Ring::Int16(ring) => ring.pop().map(|s| s as f32 / 32767.0),
            };
            let Some(sample) = sample else { break };
            *slot = sample;
            count += 1;
        }
        count
    }

    /// Move up to `out.len()` samples out as 16-bit integers.
    pub fn pop_i16(&mut self, out: &mut [i16]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            let sample = match &mut self.ring {
                Ring::Float(ring) => ring.pop().map(|s| to_i16_sample(s, 1.0)),
                Ring::Int16(ring) => ring.pop(),
            };
            let Some(sample) = sample else { break };
            *slot = sample;
            count += 1;
        }
        count
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("format", &self.format)
            .field("gain", &self.gain)
            .field("len", &self.len())
            .field("capacity", &self.ring.max_len())
            .field("device", &self.device)
            .finish()
    }
}
