//! Packet path of soundfield submixes.
//!
//! A soundfield node mixes its children into one packet of its own format:
//!
//! - PCM children are summed into the node's scratch buffer, which is encoded
//!   once after all children ran. Providers that want per-child positional
//!   encoding get a dedicated encoder per child instead.
//! - Soundfield children of a compatible format render straight into the
//!   packet. Incompatible ones render into their own packet first and are
//!   transcoded into ours.
//!
//! When a soundfield node renders into PCM (for a PCM parent or as an
//! endpoint) the mixed packet goes through its decoder, if one is set.

use std::sync::Arc;

use crate::dsp::buffer::reset_to_silence;
use crate::dsp::effects::EffectContext;
use crate::error::{MixerError, Result};
use crate::mixer::graph::{Lookup, RenderInputs, RenderOutcome, SubmixRegistry};
use crate::mixer::types::{LogThrottle, SendStage};
use crate::soundfield::{
    AmbisonicPacket, DecoderInput, EncoderInput, PositionalData, SoundfieldDecoder,
    SoundfieldEncoder, SoundfieldFormat, SoundfieldSettings, SoundfieldTranscoder,
};

use super::{keep_child, SubmixNode};

/// Streams a soundfield node owns for itself.
pub(crate) struct SoundfieldStreams {
    pub(crate) format: SoundfieldFormat,
    encoder: Box<dyn SoundfieldEncoder>,
    pub(crate) decoder: Option<Box<dyn SoundfieldDecoder>>,
    mixed: Option<Box<dyn AmbisonicPacket>>,
    positional: PositionalData,
    conflict_log: LogThrottle,
}

impl SoundfieldStreams {
    pub(crate) fn new(format: SoundfieldFormat, context: &EffectContext, decode: bool) -> Self {
        let factory = &format.factory;
        let settings = format.settings.as_ref();
        let encoder = factory.create_encoder(settings, context.channels, context.sample_rate);
        let decoder = decode
            .then(|| factory.create_decoder(settings, context.channels, context.sample_rate));
        let mixed = Some(factory.create_empty_packet());
        Self {
            encoder,
            decoder,
            mixed,
            positional: PositionalData {
                channels: context.channels,
                ..PositionalData::default()
            },
            conflict_log: LogThrottle::default(),
            format,
        }
    }
}

/// How a soundfield parent pulls one particular child into its packet.
///
/// Built on the control thread when the child is attached. A child with
/// neither stream renders directly: PCM into the parent's scratch buffer,
/// packets straight into the parent's packet.
pub struct ChildSoundfield {
    encoder: Option<Box<dyn SoundfieldEncoder>>,
    transcoder: Option<Box<dyn SoundfieldTranscoder>>,
    incoming: Option<Box<dyn AmbisonicPacket>>,
    child_settings: Option<Arc<dyn SoundfieldSettings>>,
    scratch: Vec<f32>,
}

impl ChildSoundfield {
    /// Decide the streams `parent` needs for a child in `child` format
    /// (`None` for a PCM child). Returns `Ok(None)` when the child can be
    /// mixed without any per-child stream.
    pub fn plan(
        parent: &SoundfieldFormat,
        child: Option<&SoundfieldFormat>,
        channels: usize,
        sample_rate: u32,
        max_samples: usize,
    ) -> Result<Option<Self>> {
        let factory = &parent.factory;
        match child {
            None if factory.encoder_per_child() => Ok(Some(Self {
                encoder: Some(factory.create_encoder(
                    parent.settings.as_ref(),
                    channels,
                    sample_rate,
                )),
                transcoder: None,
                incoming: None,
                child_settings: None,
                scratch: Vec::with_capacity(max_samples),
            })),
            None => Ok(None),
            Some(child) => {
                let from = child.settings.as_ref();
                if !factory.is_transcode_required(from, parent.settings.as_ref()) {
                    return Ok(None);
                }
                let from_format = child.factory.format_name();
                let transcoder = factory
                    .create_transcoder(from_format, from, parent.settings.as_ref())
                    .ok_or_else(|| {
                        MixerError::InvalidTopology(format!(
                            "no transcoder from {} into {}",
                            from_format,
                            factory.format_name()
                        ))
                    })?;
                Ok(Some(Self {
                    encoder: None,
                    transcoder: Some(transcoder),
                    incoming: Some(child.factory.create_empty_packet()),
                    child_settings: Some(child.settings.clone()),
                    scratch: Vec::new(),
                }))
            }
        }
    }

    /// A child can be encoded or transcoded, never both.
    pub fn is_conflicted(&self) -> bool {
        self.encoder.is_some() && self.transcoder.is_some()
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn has_transcoder(&self) -> bool {
        self.transcoder.is_some()
    }

    #[cfg(test)]
    pub(crate) fn with_streams(
        encoder: Option<Box<dyn SoundfieldEncoder>>,
        transcoder: Option<Box<dyn SoundfieldTranscoder>>,
    ) -> Self {
        Self {
            encoder,
            transcoder,
            incoming: None,
            child_settings: None,
            scratch: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ChildSoundfield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSoundfield")
            .field("encoder", &self.encoder.is_some())
            .field("transcoder", &self.transcoder.is_some())
            .finish()
    }
}

impl SubmixNode {
    /// Mix this node's children and sends into `packet`.
    pub(crate) fn process_packet(
        &mut self,
        packet: &mut dyn AmbisonicPacket,
        registry: &mut SubmixRegistry,
        inputs: &RenderInputs<'_>,
    ) {
        self.pump_commands();
        if !self.validate_channels(inputs) {
            return;
        }
        let channels = self.channels;
        let samples = inputs.ctx.samples();
        reset_to_silence(&mut self.input, samples);

        let id = self.id;
        let Some(streams) = self.soundfield.as_mut() else {
            log::error!("{} has no soundfield format; packet left silent", id);
            return;
        };
        streams.positional = PositionalData {
            channels,
            rotation: inputs.listener_rotation,
        };

        let input = &mut self.input;
        let child_log = &mut self.child_log;
        let mut scratch_used = false;
        self.children.retain_mut(|child| {
            let outcome = match child.soundfield.as_deref_mut() {
                Some(plan) if plan.is_conflicted() => {
                    if streams.conflict_log.ready() {
                        log::error!(
                            "{} skipped child {}: it has both an encoder and a transcoder",
                            id,
                            child.id
                        );
                    }
                    return true;
                }
                Some(ChildSoundfield {
                    encoder: Some(encoder),
                    scratch,
                    ..
                }) => {
                    reset_to_silence(scratch, samples);
                    let outcome = registry.render_into(child.id, scratch, inputs);
                    if outcome == RenderOutcome::Rendered {
                        let input = EncoderInput {
                            audio: scratch.as_slice(),
                            channels,
                            settings: streams.format.settings.as_ref(),
                            positional: &streams.positional,
                        };
                        encoder.encode_and_mix_in(&input, &mut *packet);
                    }
                    outcome
                }
                Some(ChildSoundfield {
                    transcoder: Some(transcoder),
                    incoming: Some(incoming),
                    child_settings: Some(child_settings),
                    ..
                }) => {
                    incoming.reset();
                    let outcome = registry.render_packet(child.id, incoming.as_mut(), inputs);
                    if outcome == RenderOutcome::Rendered {
                        transcoder.transcode_and_mix_in(
                            incoming.as_ref(),
                            child_settings.as_ref(),
                            &mut *packet,
                            streams.format.settings.as_ref(),
                        );
                    }
                    outcome
                }
                _ => match registry.lookup(child.id) {
                    Lookup::Ready { soundfield: true } => {
                        registry.render_packet(child.id, &mut *packet, inputs)
                    }
                    Lookup::Ready { soundfield: false } => {
                        scratch_used = true;
                        registry.render_into(child.id, input, inputs)
                    }
                    Lookup::Missing => RenderOutcome::Missing,
                    Lookup::InFlight => RenderOutcome::InFlight,
                },
            };
            keep_child(outcome, id, child.id, child_log)
        });

        if scratch_used || !self.sends.is_empty() {
            self.mix_sends(SendStage::PreEffect, inputs);
            self.mix_sends(SendStage::PostEffect, inputs);
            if let Some(streams) = self.soundfield.as_mut() {
                let input = EncoderInput {
                    audio: &self.input,
                    channels,
                    settings: streams.format.settings.as_ref(),
                    positional: &streams.positional,
                };
                streams.encoder.encode_and_mix_in(&input, &mut *packet);
            }
        }
    }

    /// Render into this node's own packet and decode it into `out`.
    pub(super) fn process_soundfield_to_pcm(
        &mut self,
        out: &mut [f32],
        registry: &mut SubmixRegistry,
        inputs: &RenderInputs<'_>,
    ) {
        let Some(mut mixed) = self.soundfield.as_mut().and_then(|s| s.mixed.take()) else {
            return;
        };
        mixed.reset();
        self.process_packet(mixed.as_mut(), registry, inputs);

        if let Some(streams) = self.soundfield.as_mut() {
            if let Some(decoder) = streams.decoder.as_mut() {
                let input = DecoderInput {
                    packet: mixed.as_ref(),
                    positional: &streams.positional,
                    frames: inputs.ctx.frames,
                    sample_rate: inputs.ctx.sample_rate,
                };
                decoder.decode_and_mix_in(&input, out);
            }
            streams.mixed = Some(mixed);
        }
    }

    /// Format of this node, if it is a soundfield submix.
    pub fn soundfield_format(&self) -> Option<&SoundfieldFormat> {
        self.soundfield.as_ref().map(|streams| &streams.format)
    }

    pub fn has_soundfield_decoder(&self) -> bool {
        self.soundfield
            .as_ref()
            .is_some_and(|streams| streams.decoder.is_some())
    }
}
