//! Identity soundfield provider.
//!
//! Packets carry interleaved PCM unchanged, so encode followed by decode
//! reproduces the input exactly. Rotation is ignored.

use std::any::Any;

use super::{
    AmbisonicPacket, DecoderInput, EncoderInput, SoundfieldDecoder, SoundfieldEncoder,
    SoundfieldFactory, SoundfieldSettings, SoundfieldTranscoder,
};

pub const FORMAT_NAME: &str = "passthrough";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassthroughSettings {
    pub order: u32,
}

impl Default for PassthroughSettings {
    fn default() -> Self {
        Self { order: 1 }
    }
}

impl SoundfieldSettings for PassthroughSettings {
    fn format_name(&self) -> &str {
        FORMAT_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Interleaved PCM wrapped as a packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassthroughPacket {
    pub channels: usize,
    pub samples: Vec<f32>,
}

impl PassthroughPacket {
    fn mix_in(&mut self, samples: &[f32], channels: usize) {
        if self.samples.len() < samples.len() {
            self.samples.resize(samples.len(), 0.0);
        }
        self.channels = self.channels.max(channels);
        for (dst, src) in self.samples.iter_mut().zip(samples) {
            *dst += *src;
        }
    }
}

impl AmbisonicPacket for PassthroughPacket {
    fn reset(&mut self) {
        self.samples.fill(0.0);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct PassthroughEncoder;

impl SoundfieldEncoder for PassthroughEncoder {
    fn encode_and_mix_in(&mut self, input: &EncoderInput<'_>, output: &mut dyn AmbisonicPacket) {
        if let Some(packet) = output.as_any_mut().downcast_mut::<PassthroughPacket>() {
            packet.mix_in(input.audio, input.channels);
        }
    }
}

struct PassthroughDecoder;

impl SoundfieldDecoder for PassthroughDecoder {
    fn decode_and_mix_in(&mut self, input: &DecoderInput<'_>, output: &mut [f32]) {
        let Some(packet) = input.packet.as_any().downcast_ref::<PassthroughPacket>() else {
            return;
        };
        for (dst, src) in output.iter_mut().zip(&packet.samples) {
            *dst += *src;
        }
    }
}

struct PassthroughTranscoder;

impl SoundfieldTranscoder for PassthroughTranscoder {
    fn transcode_and_mix_in(
        &mut self,
        input: &dyn AmbisonicPacket,
        _input_settings: &dyn SoundfieldSettings,
        output: &mut dyn AmbisonicPacket,
        _output_settings: &dyn SoundfieldSettings,
    ) {
        let Some(source) = input.as_any().downcast_ref::<PassthroughPacket>() else {
            return;
        };
        if let Some(dest) = output.as_any_mut().downcast_mut::<PassthroughPacket>() {
            dest.mix_in(&source.samples, source.channels);
        }
    }
}

/// Factory for the identity format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFactory;

impl SoundfieldFactory for PassthroughFactory {
    fn format_name(&self) -> &str {
        FORMAT_NAME
    }

    fn create_empty_packet(&self) -> Box<dyn AmbisonicPacket> {
        Box::new(PassthroughPacket::default())
    }

    fn create_encoder(
        &self,
        _settings: &dyn SoundfieldSettings,
        _channels: usize,
        _sample_rate: u32,
    ) -> Box<dyn SoundfieldEncoder> {
        Box::new(PassthroughEncoder)
    }

    fn create_decoder(
        &self,
        _settings: &dyn SoundfieldSettings,
        _channels: usize,
        _sample_rate: u32,
    ) -> Box<dyn SoundfieldDecoder> {
        Box::new(PassthroughDecoder)
    }

    fn create_transcoder(
        &self,
        from_format: &str,
        _from_settings: &dyn SoundfieldSettings,
        _to_settings: &dyn SoundfieldSettings,
    ) -> Option<Box<dyn SoundfieldTranscoder>> {
        if from_format != FORMAT_NAME {
            return None;
        }
        Some(Box::new(PassthroughTranscoder))
    }

    fn is_transcode_required(
        &self,
        from: &dyn SoundfieldSettings,
        to: &dyn SoundfieldSettings,
    ) -> bool {
        let order = |settings: &dyn SoundfieldSettings| {
            settings
                .as_any()
                .downcast_ref::<PassthroughSettings>()
                .map(|s| s.order)
        };
        from.format_name() != to.format_name() || order(from) != order(to)
    }
}
