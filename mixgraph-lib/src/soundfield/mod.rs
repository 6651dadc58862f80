//! Soundfield (ambisonic) conversion contract.
//!
//! A soundfield submix mixes its children into one [`AmbisonicPacket`] instead
//! of interleaved PCM. The math lives in an external provider that implements
//! [`SoundfieldFactory`]; the mixer only orchestrates three operations:
//!
//! - encode: PCM + channel count + settings + positional data, mixed into a packet
//! - transcode: a packet in one format, mixed into a packet of another format
//! - decode: a packet + positional data + frame count + sample rate, mixed into PCM
//!
//! Every operation *mixes into* its destination. Streams are created on the
//! control thread and then owned by the render thread.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub mod passthrough;

pub use passthrough::{PassthroughFactory, PassthroughPacket, PassthroughSettings};

/// Listener orientation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Spatial context handed to encoders and decoders.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionalData {
    /// Channel count of the PCM side of the conversion.
    pub channels: usize,
    pub rotation: Rotation,
}

/// Opaque encoded buffer owned by one soundfield format.
pub trait AmbisonicPacket: Send {
    /// Return the packet to silence without releasing its storage.
    fn reset(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Format-specific settings such as ambisonic order.
pub trait SoundfieldSettings: Send + Sync + fmt::Debug {
    /// Name of the format these settings belong to.
    fn format_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Input to [`SoundfieldEncoder::encode_and_mix_in`].
pub struct EncoderInput<'a> {
    pub audio: &'a [f32],
    pub channels: usize,
    pub settings: &'a dyn SoundfieldSettings,
    pub positional: &'a PositionalData,
}

/// Input to [`SoundfieldDecoder::decode_and_mix_in`].
pub struct DecoderInput<'a> {
    pub packet: &'a dyn AmbisonicPacket,
    pub positional: &'a PositionalData,
    pub frames: usize,
    pub sample_rate: u32,
}

pub trait SoundfieldEncoder: Send {
    fn encode_and_mix_in(&mut self, input: &EncoderInput<'_>, output: &mut dyn AmbisonicPacket);
}

pub trait SoundfieldDecoder: Send {
    /// Decode into interleaved PCM, adding to whatever `output` holds.
    fn decode_and_mix_in(&mut self, input: &DecoderInput<'_>, output: &mut [f32]);
}

pub trait SoundfieldTranscoder: Send {
    fn transcode_and_mix_in(
        &mut self,
        input: &dyn AmbisonicPacket,
        input_settings: &dyn SoundfieldSettings,
        output: &mut dyn AmbisonicPacket,
        output_settings: &dyn SoundfieldSettings,
    );
}

/// Entry point of a soundfield provider.
pub trait SoundfieldFactory: Send + Sync {
    fn format_name(&self) -> &str;

    fn create_empty_packet(&self) -> Box<dyn AmbisonicPacket>;

    fn create_encoder(
        &self,
        settings: &dyn SoundfieldSettings,
        channels: usize,
        sample_rate: u32,
    ) -> Box<dyn SoundfieldEncoder>;

    fn create_decoder(
        &self,
        settings: &dyn SoundfieldSettings,
        channels: usize,
        sample_rate: u32,
    ) -> Box<dyn SoundfieldDecoder>;

    /// Create a transcoder that converts packets of `from_format` into this
    /// factory's format. `None` if the conversion is not supported.
    fn create_transcoder(
        &self,
        from_format: &str,
        from_settings: &dyn SoundfieldSettings,
        to_settings: &dyn SoundfieldSettings,
    ) -> Option<Box<dyn SoundfieldTranscoder>>;

    /// `false` when packets in `from` can be summed directly into `to`.
    fn is_transcode_required(
        &self,
        from: &dyn SoundfieldSettings,
        to: &dyn SoundfieldSettings,
    ) -> bool;

    /// When `true`, every non-soundfield child gets its own encoder instead of
    /// being summed into the parent's PCM scratch buffer first.
    fn encoder_per_child(&self) -> bool {
        false
    }
}

/// Format chosen for a soundfield submix.
#[derive(Clone)]
pub struct SoundfieldFormat {
    pub factory: Arc<dyn SoundfieldFactory>,
    pub settings: Arc<dyn SoundfieldSettings>,
}

impl SoundfieldFormat {
    pub fn new(factory: Arc<dyn SoundfieldFactory>, settings: Arc<dyn SoundfieldSettings>) -> Self {
        Self { factory, settings }
    }

    /// Passthrough format used when a graph asks for a soundfield node without
    /// naming a provider.
    pub fn passthrough() -> Self {
        Self::new(
            Arc::new(PassthroughFactory),
            Arc::new(PassthroughSettings::default()),
        )
    }
}

impl fmt::Debug for SoundfieldFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundfieldFormat")
            .field("format", &self.factory.format_name())
            .field("settings", &self.settings)
            .finish()
    }
}
