//! The submix node: one vertex of the mixing graph.
//!
//! A node sums its children and source sends into an accumulation buffer,
//! runs its effect chains, recombines wet and dry signal, feeds its analysis
//! taps and finally adds the result into its parent's buffer. Nodes never hold
//! references to each other; children and parents are [`SubmixId`]s resolved
//! through the [`SubmixRegistry`] on every callback, and ids that no longer
//! resolve are pruned on the spot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsp::buffer::{mix_in, mix_in_scaled, reset_to_silence};
use crate::dsp::effects::{AudioEffect, EffectContext};
use crate::dsp::envelope::EnvelopeFollower;
use crate::dsp::fader::LevelRamp;
use crate::dsp::level::deserialize_linear_gain;
use crate::mixer::chain::{ChainStack, EffectChain};
use crate::mixer::command::SubmixCommand;
use crate::mixer::graph::{RenderInputs, RenderOutcome, SubmixRegistry};
use crate::mixer::types::{
    EndpointKind, LogThrottle, SendStage, SourceId, SubmixId, MAX_OUTPUT_CHANNELS,
};
use crate::queue::{Consumer, Mpsc};
use crate::soundfield::SoundfieldFormat;

mod analysis;
mod soundfield;

pub use analysis::{RecordedAudio, SubmixBufferListener, SubmixShared};
pub use soundfield::ChildSoundfield;
pub(crate) use soundfield::SoundfieldStreams;

/// Everything needed to create a submix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmixDescriptor {
    pub name: String,
    pub endpoint: EndpointKind,
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub output_volume: f32,
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub dry_level: f32,
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub wet_level: f32,
    pub background_muted: bool,
    /// Base effect chain.
    pub effects: Vec<AudioEffect>,
    #[serde(skip)]
    pub soundfield: Option<SoundfieldFormat>,
}

impl Default for SubmixDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint: EndpointKind::None,
            output_volume: 1.0,
            dry_level: 0.0,
            wet_level: 1.0,
            background_muted: false,
            effects: Vec::new(),
            soundfield: None,
        }
    }
}

impl SubmixDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

struct ChildEntry {
    id: SubmixId,
    soundfield: Option<Box<ChildSoundfield>>,
}

#[derive(Debug, Clone, Copy)]
struct SourceSend {
    source: SourceId,
    level: f32,
    stage: SendStage,
}

/// Render-thread state of one submix.
pub struct SubmixNode {
    id: SubmixId,
    name: String,
    endpoint: EndpointKind,
    parent: Option<SubmixId>,
    children: Vec<ChildEntry>,
    sends: Vec<SourceSend>,

    output_volume: LevelRamp,
    dry_level: LevelRamp,
    wet_level: LevelRamp,
    background_muted: bool,
    chains: ChainStack,

    channels: usize,
    input: Vec<f32>,
    dry: Vec<f32>,
    mono: Vec<f32>,

    envelope: Vec<EnvelopeFollower>,
    envelope_values: Vec<f32>,

    soundfield: Option<SoundfieldStreams>,
    shared: Arc<SubmixShared>,
    commands: Consumer<SubmixCommand, Mpsc>,

    channel_log: LogThrottle,
    child_log: LogThrottle,
}

impl SubmixNode {
    /// Build a node on the control thread. Scratch buffers are sized for
    /// `max_samples` so rendering never has to grow them.
    pub(crate) fn new(
        id: SubmixId,
        descriptor: SubmixDescriptor,
        effect_context: &EffectContext,
        max_samples: usize,
        commands: Consumer<SubmixCommand, Mpsc>,
        shared: Arc<SubmixShared>,
    ) -> Self {
        let mut chains = ChainStack::with_capacity(max_samples);
        if !descriptor.effects.is_empty() {
            let mut base = EffectChain::from_effects(descriptor.effects);
            base.warm_up(effect_context);
            chains.set_base(base, 0.0);
        }
        let soundfield = descriptor.soundfield.map(|format| {
            let decode = descriptor.endpoint.is_endpoint();
            SoundfieldStreams::new(format, effect_context, decode)
        });

        Self {
            id,
            name: descriptor.name,
            endpoint: descriptor.endpoint,
            parent: None,
            children: Vec::with_capacity(8),
            sends: Vec::with_capacity(8),
            output_volume: LevelRamp::new(descriptor.output_volume),
            dry_level: LevelRamp::new(descriptor.dry_level),
            wet_level: LevelRamp::new(descriptor.wet_level),
            background_muted: descriptor.background_muted,
            chains,
            channels: effect_context.channels,
            input: Vec::with_capacity(max_samples),
            dry: Vec::with_capacity(max_samples),
            mono: Vec::with_capacity(max_samples),
            envelope: Vec::new(),
            envelope_values: Vec::with_capacity(MAX_OUTPUT_CHANNELS),
            soundfield,
            shared,
            commands,
            channel_log: LogThrottle::default(),
            child_log: LogThrottle::default(),
        }
    }

    pub fn id(&self) -> SubmixId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> EndpointKind {
        self.endpoint
    }

    pub fn parent(&self) -> Option<SubmixId> {
        self.parent
    }

    pub fn is_soundfield(&self) -> bool {
        self.soundfield.is_some()
    }

    pub fn children(&self) -> impl Iterator<Item = SubmixId> + '_ {
        self.children.iter().map(|child| child.id)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn effect_chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn shared(&self) -> &Arc<SubmixShared> {
        &self.shared
    }

    /// Apply every queued command. The rest of the callback sees the result.
    fn pump_commands(&mut self) {
        while let Some(command) = self.commands.dequeue() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: SubmixCommand) {
        match command {
            SubmixCommand::AddChild { child, soundfield } => {
                if child == self.id {
                    log::error!("{} cannot be its own child", self.id);
                    return;
                }
                match self.children.iter_mut().find(|entry| entry.id == child) {
                    Some(entry) => entry.soundfield = soundfield,
                    None => self.children.push(ChildEntry {
                        id: child,
                        soundfield,
                    }),
                }
            }
            SubmixCommand::RemoveChild(child) => self.children.retain(|entry| entry.id != child),
            SubmixCommand::SetParent(parent) => self.parent = parent,
            SubmixCommand::SetOutputVolume(volume) => self.output_volume.set_target(volume),
            SubmixCommand::SetDryLevel(level) => self.dry_level.set_target(level),
            SubmixCommand::SetWetLevel(level) => self.wet_level.set_target(level),
            SubmixCommand::SetBackgroundMuted(muted) => self.background_muted = muted,
            SubmixCommand::PushEffectChain {
                chain,
                fade_seconds,
            } => self.chains.push(chain, fade_seconds),
            SubmixCommand::PopEffectChain { fade_seconds } => self.chains.pop(fade_seconds),
            SubmixCommand::SetBaseEffectChain {
                chain,
                fade_seconds,
            } => self.chains.set_base(chain, fade_seconds),
            SubmixCommand::ClearEffectChains { fade_seconds } => self.chains.clear(fade_seconds),
            SubmixCommand::AddSend {
                source,
                level,
                stage,
            } => match self.sends.iter_mut().find(|send| send.source == source) {
                Some(send) => {
                    send.level = level;
                    send.stage = stage;
                }
                None => self.sends.push(SourceSend {
                    source,
                    level,
                    stage,
                }),
            },
            SubmixCommand::RemoveSend(source) => self.sends.retain(|send| send.source != source),
            SubmixCommand::StartEnvelopeFollowing(followers) => self.envelope = followers,
            SubmixCommand::StopEnvelopeFollowing => {
                self.envelope.clear();
                self.envelope_values.clear();
                self.shared.clear_envelope();
            }
            SubmixCommand::SetSoundfieldDecoder(decoder) => match self.soundfield.as_mut() {
                Some(streams) => streams.decoder = decoder,
                None => log::warn!("{} is not a soundfield submix; decoder ignored", self.id),
            },
        }
    }

    /// Check the device channel count; a bad count skips this node.
    fn validate_channels(&mut self, inputs: &RenderInputs<'_>) -> bool {
        let channels = inputs.ctx.channels;
        if channels == 0 || channels > MAX_OUTPUT_CHANNELS {
            if self.channel_log.ready() {
                log::error!(
                    "{} ({}) skipped: device reports {} channels, supported range is 1..={}",
                    self.id,
                    self.name,
                    channels,
                    MAX_OUTPUT_CHANNELS
                );
            }
            return false;
        }
        self.channels = channels;
        true
    }

    /// Render children into the accumulation buffer, pruning destroyed ones.
    fn mix_children(&mut self, registry: &mut SubmixRegistry, inputs: &RenderInputs<'_>) {
        let id = self.id;
        let input = &mut self.input;
        let child_log = &mut self.child_log;
        self.children.retain(|child| {
            let outcome = registry.render_into(child.id, input, inputs);
            keep_child(outcome, id, child.id, child_log)
        });
    }

    /// Drop sends whose source is gone, then mix those at `stage`.
    fn mix_sends(&mut self, stage: SendStage, inputs: &RenderInputs<'_>) {
        let buffer = &mut self.input;
        self.sends.retain(|send| match inputs.sources.output(send.source) {
            Some(audio) => {
                if send.stage == stage {
                    mix_in_scaled(audio, buffer, send.level);
                }
                true
            }
            None => {
                log::debug!("pruned send from destroyed {}", send.source);
                false
            }
        });
    }

    fn update_envelope(&mut self) {
        if self.envelope.is_empty() {
            return;
        }
        let channels = self.channels.min(self.envelope.len());
        self.envelope_values.clear();
        for (channel, follower) in self.envelope.iter_mut().take(channels).enumerate() {
            let value = follower.process_channel(&self.input, channel, self.channels);
            self.envelope_values.push(value);
        }
        self.shared.publish_envelope(&self.envelope_values);
    }

    /// Render one callback and add the result into `out`.
    pub fn process_audio(
        &mut self,
        out: &mut [f32],
        registry: &mut SubmixRegistry,
        inputs: &RenderInputs<'_>,
    ) {
        if self.soundfield.is_some() {
            self.process_soundfield_to_pcm(out, registry, inputs);
            return;
        }

        self.pump_commands();
        if !self.validate_channels(inputs) {
            return;
        }
        let ctx = inputs.ctx;
        let channels = self.channels;

        reset_to_silence(&mut self.input, ctx.samples());
        self.mix_children(registry, inputs);
        self.mix_sends(SendStage::PreEffect, inputs);

        let keep_dry = self.dry_level.is_audible();
        if keep_dry {
            self.dry.clear();
            self.dry.extend_from_slice(&self.input);
        }

        if !ctx.settings.bypass_submix_effects && !self.chains.is_empty() {
            let effect_ctx = EffectContext::new(ctx.sample_rate, channels);
            self.chains
                .process(&mut self.input, &effect_ctx, ctx.callback_seconds());
            // Wet level only scales a buffer that went through the chains.
            self.wet_level.apply(&mut self.input, channels);
        }

        if keep_dry {
            self.dry_level.mix_into(&self.dry, &mut self.input, channels);
        }
        self.mix_sends(SendStage::PostEffect, inputs);

        // Taps see the signal before mute and output volume.
        self.shared.append_recording(&self.input);
        self.shared.analyze(&self.input, channels, &mut self.mono);
        self.update_envelope();

        if self.background_muted {
            self.input.fill(0.0);
        }
        self.output_volume.apply(&mut self.input, channels);

        mix_in(&self.input, out);
        self.shared.notify_listeners(self.id, &self.input, &ctx);
    }
}

/// Whether a child stays attached after a render attempt.
fn keep_child(
    outcome: RenderOutcome,
    parent: SubmixId,
    child: SubmixId,
    throttle: &mut LogThrottle,
) -> bool {
    match outcome {
        RenderOutcome::Rendered => true,
        RenderOutcome::Missing => {
            log::debug!("{} pruned destroyed child {}", parent, child);
            false
        }
        RenderOutcome::InFlight => {
            if throttle.ready() {
                log::error!("{} skipped child {}: it is already rendering", parent, child);
            }
            true
        }
    }
}

impl std::fmt::Debug for SubmixNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmixNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("parent", &self.parent)
            .field("children", &self.children.iter().map(|c| c.id).collect::<Vec<_>>())
            .field("soundfield", &self.soundfield.is_some())
            .finish()
    }
}
