//! The submix graph: nodes, sources, commands and the device tick.

pub mod chain;
pub mod clock;
pub mod command;
mod device;
pub mod graph;
mod handle;
pub mod source;
pub mod submix;
pub(crate) mod types;

pub use chain::{ChainStack, EffectChain};
pub use clock::{Quantization, QuantizedClock};
pub use command::{DeviceCommand, Garbage, SubmixCommand};
pub use device::MixerDevice;
pub use graph::{RenderInputs, RenderOutcome, SubmixRegistry};
pub use handle::MixerHandle;
pub use source::{
    BufferGenerator, GeneratorConfig, NoiseGenerator, SineGenerator, SourceGenerator,
    SourceManager, SourceSettings, SourceVoice,
};
pub use submix::{
    ChildSoundfield, RecordedAudio, SubmixBufferListener, SubmixDescriptor, SubmixNode,
    SubmixShared,
};
pub use types::{
    EndpointKind, RenderContext, RenderSettings, SendStage, SourceId, SubmixId,
    MAX_OUTPUT_CHANNELS,
};

use crate::config::MixerConfig;
use crate::error::Result;
use crate::output::OutputBuffer;
use crate::queue;

/// Create a mixer: the control handle and the output buffer that owns the
/// render side. Drive rendering with [`OutputBuffer::mix_next_buffer`] from
/// the audio thread.
pub fn create_mixer(config: &MixerConfig) -> Result<(MixerHandle, OutputBuffer)> {
    config.validate()?;
    let (device_tx, device_rx) = queue::mpsc();
    let (garbage_tx, garbage_rx) = queue::spsc();

    let device = MixerDevice::new(
        config.sample_rate,
        config.channels,
        config.frames_per_callback,
        config.render,
        config.max_submixes,
        device_rx,
        garbage_tx,
    );
    let handle = MixerHandle::new(config, device_tx, garbage_rx);
    let output = OutputBuffer::new(
        device,
        config.output_format,
        config.final_output_gain,
        config.circular_buffer_quanta,
    );
    log::info!(
        "mixer ready: {} Hz, {} channels, {} frames per callback",
        config.sample_rate,
        config.channels,
        config.frames_per_callback
    );
    Ok((handle, output))
}

#[cfg(test)]
mod tests;
