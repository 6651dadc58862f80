//! Sinks for externally-consumed endpoint submixes.

use std::sync::{Arc, Mutex};

use dasp_ring_buffer::Bounded;

/// Receives the rendered audio of one external endpoint submix each callback.
///
/// Runs on the render thread.
pub trait AudioEndpoint: Send {
    /// Accept one callback of interleaved audio. Returns `false` if the sink
    /// dropped it.
    fn submit(&mut self, samples: &[f32], channels: usize, sample_rate: u32) -> bool;
}

/// Shared ring buffer an endpoint writes to and a reader drains.
pub type EndpointBuffer = Arc<Mutex<Bounded<Vec<f32>>>>;

/// Endpoint that captures into a bounded ring buffer.
///
/// A callback that does not fit in the remaining space is dropped whole, so
/// the reader never sees a partial block.
#[derive(Debug)]
pub struct CaptureEndpoint {
    buffer: EndpointBuffer,
    dropped: usize,
}

impl CaptureEndpoint {
    /// Create an endpoint holding at most `capacity` samples and the reader
    /// that drains it.
    pub fn new(capacity: usize) -> (Self, CaptureReader) {
        let buffer = Arc::new(Mutex::new(Bounded::from(vec![0.0; capacity.max(1)])));
        (
            Self {
                buffer: buffer.clone(),
                dropped: 0,
            },
            CaptureReader { buffer },
        )
    }

    /// Callbacks dropped because the reader fell behind.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl AudioEndpoint for CaptureEndpoint {
    fn submit(&mut self, samples: &[f32], _channels: usize, _sample_rate: u32) -> bool {
        let Ok(mut buffer) = self.buffer.try_lock() else {
            self.dropped += 1;
            return false;
        };
        if buffer.max_len().saturating_sub(buffer.len()) < samples.len() {
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                log::warn!("capture endpoint full; {} callbacks dropped", self.dropped);
            }
            return false;
        }
        for &sample in samples {
            buffer.push(sample);
        }
        true
    }
}

/// Control-side half of a [`CaptureEndpoint`].
#[derive(Debug, Clone)]
pub struct CaptureReader {
    buffer: EndpointBuffer,
}

impl CaptureReader {
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move everything captured so far into `out`. Returns the sample count.
    pub fn drain_into(&self, out: &mut Vec<f32>) -> usize {
        let Ok(mut buffer) = self.buffer.lock() else {
            return 0;
        };
        let mut moved = 0;
        while let Some(sample) = buffer.pop() {
            out.push(sample);
            moved += 1;
        }
        moved
    }
}
