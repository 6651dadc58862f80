//! Control-thread API of a mixer.
//!
//! [`MixerHandle`] keeps a control-side mirror of the graph (names, parents,
//! endpoint kinds, soundfield formats) so topology changes can be validated
//! before anything reaches the render thread. Valid changes are expressed as
//! [`DeviceCommand`]s and [`SubmixCommand`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::MixerConfig;
use crate::dsp::effects::{AudioEffect, EffectContext};
use crate::dsp::envelope::{EnvelopeFollower, EnvelopeSettings};
use crate::dsp::spectrum::{SpectrumAnalyzer, SpectrumSettings};
use crate::error::{MixerError, Result};
use crate::mixer::chain::EffectChain;
use crate::mixer::clock::Quantization;
use crate::mixer::command::{DeviceCommand, Garbage, SubmixCommand};
use crate::mixer::source::{SourceGenerator, SourceSettings, SourceVoice};
use crate::mixer::submix::{
    ChildSoundfield, RecordedAudio, SubmixBufferListener, SubmixDescriptor, SubmixNode,
    SubmixShared,
};
use crate::mixer::types::{
    EndpointKind, RenderSettings, SendStage, SourceId, SubmixId, MAX_OUTPUT_CHANNELS,
};
use crate::output::AudioEndpoint;
use crate::queue::{Consumer, Mpsc, Producer, Spsc};
use crate::soundfield::{Rotation, SoundfieldFormat};

/// Callbacks of audio reserved when a recording starts.
const RECORDING_RESERVE_CALLBACKS: usize = 256;

struct SubmixRecord {
    name: String,
    endpoint: EndpointKind,
    parent: Option<SubmixId>,
    children: Vec<SubmixId>,
    soundfield: Option<SoundfieldFormat>,
    commands: Producer<SubmixCommand, Mpsc>,
    shared: Arc<SubmixShared>,
}

#[derive(Default)]
struct SourceRecord {
    sends: Vec<SubmixId>,
}

#[derive(Default)]
struct ControlState {
    next_submix: u32,
    next_source: u32,
    submixes: HashMap<SubmixId, SubmixRecord>,
    sources: HashMap<SourceId, SourceRecord>,
    master: Option<SubmixId>,
}

impl ControlState {
    fn submix(&self, id: SubmixId) -> Result<&SubmixRecord> {
        self.submixes.get(&id).ok_or(MixerError::UnknownSubmix(id))
    }

    fn send(&self, id: SubmixId, command: SubmixCommand) -> Result<()> {
        self.submix(id)?
            .commands
            .enqueue(command)
            .map_err(|_| MixerError::QueueAllocation)
    }

    /// True if `ancestor` is reachable from `node` by following parents.
    fn is_ancestor(&self, ancestor: SubmixId, node: SubmixId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.submixes.len() {
                return true;
            }
            current = self.submixes.get(&id).and_then(|record| record.parent);
        }
        false
    }
}

struct HandleInner {
    sample_rate: u32,
    channels: usize,
    frames: usize,
    max_submixes: usize,
    fade_seconds: f32,
    device: Producer<DeviceCommand, Mpsc>,
    state: Mutex<ControlState>,
    garbage: Mutex<Consumer<Garbage, Spsc>>,
}

/// Cloneable control handle; every clone drives the same mixer.
#[derive(Clone)]
pub struct MixerHandle {
    inner: Arc<HandleInner>,
}

impl MixerHandle {
    pub(crate) fn new(
        config: &MixerConfig,
        device: Producer<DeviceCommand, Mpsc>,
        garbage: Consumer<Garbage, Spsc>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                sample_rate: config.sample_rate,
                channels: config.channels,
                frames: config.frames_per_callback,
                max_submixes: config.max_submixes,
                fade_seconds: config.fade_seconds,
                device,
                state: Mutex::new(ControlState::default()),
                garbage: Mutex::new(garbage),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send_device(&self, command: DeviceCommand) -> Result<()> {
        self.inner
            .device
            .enqueue(command)
            .map_err(|_| MixerError::QueueAllocation)
    }

    fn effect_context(&self) -> EffectContext {
        EffectContext::new(self.inner.sample_rate, self.inner.channels)
    }

    fn max_samples(&self) -> usize {
        self.inner.channels * self.inner.frames
    }

    fn build_chain(&self, effects: Vec<AudioEffect>) -> EffectChain {
        let mut chain = EffectChain::from_effects(effects);
        chain.warm_up(&self.effect_context());
        chain
    }

    /// Device sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Interleaved output channel count.
    pub fn channels(&self) -> usize {
        self.inner.channels
    }

    /// Frames rendered per device callback.
    pub fn frames_per_callback(&self) -> usize {
        self.inner.frames
    }

    /// Crossfade used when a base effect chain is replaced.
    pub fn fade_seconds(&self) -> f32 {
        self.inner.fade_seconds
    }

    // Topology.

    /// Create a submix from `descriptor` and hand it to the render thread.
    ///
    /// The node starts unparented. A [`EndpointKind::Default`] submix is
    /// registered as a device endpoint right away.
    ///
    /// # Errors
    ///
    /// [`MixerError::RegistryFull`] once `max_submixes` submixes exist.
    pub fn create_submix(&self, descriptor: SubmixDescriptor) -> Result<SubmixId> {
        let mut state = self.state();
        if state.submixes.len() >= self.inner.max_submixes {
            return Err(MixerError::RegistryFull(self.inner.max_submixes));
        }
        let id = SubmixId(state.next_submix);
        state.next_submix += 1;

        let (producer, consumer) = crate::queue::mpsc();
        let shared = Arc::new(SubmixShared::default());
        let record = SubmixRecord {
            name: descriptor.name.clone(),
            endpoint: descriptor.endpoint,
            parent: None,
            children: Vec::new(),
            soundfield: descriptor.soundfield.clone(),
            commands: producer,
            shared: shared.clone(),
        };
        let endpoint = descriptor.endpoint;
        let node = SubmixNode::new(
            id,
            descriptor,
            &self.effect_context(),
            self.max_samples(),
            consumer,
            shared,
        );
        self.send_device(DeviceCommand::InsertSubmix(Box::new(node)))?;
        if endpoint == EndpointKind::Default {
            self.send_device(DeviceCommand::AddDefaultEndpoint(id))?;
        }
        state.submixes.insert(id, record);
        log::debug!("created {} ({:?})", id, endpoint);
        Ok(id)
    }

    /// Remove a submix. Its children become unparented and its parent drops
    /// it; the node itself comes back through [`Self::collect_garbage`].
    pub fn destroy_submix(&self, id: SubmixId) -> Result<()> {
        let mut state = self.state();
        let record = state
            .submixes
            .remove(&id)
            .ok_or(MixerError::UnknownSubmix(id))?;

        if let Some(parent) = record.parent {
            if let Some(parent_record) = state.submixes.get_mut(&parent) {
                parent_record.children.retain(|&child| child != id);
                if parent_record
                    .commands
                    .enqueue(SubmixCommand::RemoveChild(id))
                    .is_err()
                {
                    log::warn!("{} keeps {} until its next render", parent, id);
                }
            }
        }
        for child in &record.children {
            if let Some(child_record) = state.submixes.get_mut(child) {
                child_record.parent = None;
                if child_record
                    .commands
                    .enqueue(SubmixCommand::SetParent(None))
                    .is_err()
                {
                    log::warn!("{} could not be told its parent {} is gone", child, id);
                }
            }
        }
        for source in state.sources.values_mut() {
            source.sends.retain(|&submix| submix != id);
        }
        if state.master == Some(id) {
            state.master = None;
        }
        self.send_device(DeviceCommand::RemoveSubmix(id))?;
        log::debug!("destroyed {} ({})", id, record.name);
        Ok(())
    }

    /// Attach `child` under `parent`, or detach it with `None`.
    pub fn set_parent(&self, child: SubmixId, parent: Option<SubmixId>) -> Result<()> {
        let mut state = self.state();
        let child_record = state.submix(child)?;
        let old_parent = child_record.parent;
        let child_format = child_record.soundfield.clone();
        let child_endpoint = child_record.endpoint;

        let plan = match parent {
            Some(parent_id) => {
                let parent_record = state.submix(parent_id)?;
                if parent_id == child {
                    return Err(MixerError::InvalidTopology(format!(
                        "{} cannot parent itself",
                        child
                    )));
                }
                if child_endpoint.is_endpoint() {
                    return Err(MixerError::InvalidTopology(format!(
                        "{} is an endpoint and cannot have a parent",
                        child
                    )));
                }
                if state.is_ancestor(child, parent_id) {
                    return Err(MixerError::InvalidTopology(format!(
                        "parenting {} under {} would create a cycle",
                        child, parent_id
                    )));
                }
                match &parent_record.soundfield {
                    Some(parent_format) => ChildSoundfield::plan(
                        parent_format,
                        child_format.as_ref(),
                        self.inner.channels,
                        self.inner.sample_rate,
                        self.max_samples(),
                    )?,
                    None => None,
                }
            }
            None => None,
        };
        if plan.as_ref().is_some_and(ChildSoundfield::is_conflicted) {
            return Err(MixerError::SoundfieldConflict(child));
        }

        if let Some(old) = old_parent.filter(|&old| Some(old) != parent) {
            state.send(old, SubmixCommand::RemoveChild(child))?;
            if let Some(record) = state.submixes.get_mut(&old) {
                record.children.retain(|&c| c != child);
            }
        }
        if let Some(parent_id) = parent {
            state.send(
                parent_id,
                SubmixCommand::AddChild {
                    child,
                    soundfield: plan.map(Box::new),
                },
            )?;
            if let Some(record) = state.submixes.get_mut(&parent_id) {
                if !record.children.contains(&child) {
                    record.children.push(child);
                }
            }
        }
        state.send(child, SubmixCommand::SetParent(parent))?;
        if let Some(record) = state.submixes.get_mut(&child) {
            record.parent = parent;
        }
        self.refresh_decoder(&state, child)
    }

    /// A soundfield node decodes when something consumes its PCM: a PCM
    /// parent, the master slot, or an endpoint registration.
    fn refresh_decoder(&self, state: &ControlState, id: SubmixId) -> Result<()> {
        let record = state.submix(id)?;
        let Some(format) = &record.soundfield else {
            return Ok(());
        };
        let parent_is_pcm = record
            .parent
            .and_then(|parent| state.submixes.get(&parent))
            .is_some_and(|parent| parent.soundfield.is_none());
        let needs_decoder =
            parent_is_pcm || state.master == Some(id) || record.endpoint.is_endpoint();
        let decoder = needs_decoder.then(|| {
            format.factory.create_decoder(
                format.settings.as_ref(),
                self.inner.channels,
                self.inner.sample_rate,
            )
        });
        state.send(id, SubmixCommand::SetSoundfieldDecoder(decoder))
    }

    /// Choose the submix rendered into the device output, or clear it.
    ///
    /// A soundfield master gets a decoder so it can render PCM.
    pub fn set_master(&self, id: Option<SubmixId>) -> Result<()> {
        let mut state = self.state();
        if let Some(id) = id {
            state.submix(id)?;
        }
        let previous = state.master;
        state.master = id;
        self.send_device(DeviceCommand::SetMaster(id))?;
        if let Some(previous) = previous.filter(|&p| state.submixes.contains_key(&p)) {
            self.refresh_decoder(&state, previous)?;
        }
        if let Some(id) = id {
            self.refresh_decoder(&state, id)?;
        }
        Ok(())
    }

    /// Current master submix, as last set from this side.
    pub fn master(&self) -> Option<SubmixId> {
        self.state().master
    }

    /// Route an external endpoint submix into `sink`.
    pub fn attach_external_endpoint(
        &self,
        id: SubmixId,
        sink: Box<dyn AudioEndpoint>,
    ) -> Result<()> {
        let state = self.state();
        let record = state.submix(id)?;
        if record.endpoint != EndpointKind::External {
            return Err(MixerError::InvalidTopology(format!(
                "{} is not an external endpoint",
                id
            )));
        }
        self.send_device(DeviceCommand::AddExternalEndpoint { id, sink })
    }

    /// Stop rendering `id` as a device or external endpoint.
    pub fn detach_endpoint(&self, id: SubmixId) -> Result<()> {
        self.state().submix(id)?;
        self.send_device(DeviceCommand::RemoveEndpoint(id))
    }

    /// Oldest live submix called `name`.
    pub fn submix_by_name(&self, name: &str) -> Option<SubmixId> {
        let state = self.state();
        let mut ids: Vec<_> = state
            .submixes
            .iter()
            .filter(|(_, record)| record.name == name)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.first().copied()
    }

    /// Parent of `id` in the control-side mirror.
    pub fn parent_of(&self, id: SubmixId) -> Result<Option<SubmixId>> {
        Ok(self.state().submix(id)?.parent)
    }

    /// Children of `id`, in attach order.
    pub fn children_of(&self, id: SubmixId) -> Result<Vec<SubmixId>> {
        Ok(self.state().submix(id)?.children.clone())
    }

    /// Live submixes, including ones the render thread has not seen yet.
    pub fn submix_count(&self) -> usize {
        self.state().submixes.len()
    }

    // Levels.

    /// Set the linear gain applied after mute. The change ramps over one
    /// callback.
    pub fn set_output_volume(&self, id: SubmixId, volume: f32) -> Result<()> {
        self.state().send(id, SubmixCommand::SetOutputVolume(volume))
    }

    /// Set how much of the pre-effect signal is mixed back in.
    pub fn set_dry_level(&self, id: SubmixId, level: f32) -> Result<()> {
        self.state().send(id, SubmixCommand::SetDryLevel(level))
    }

    /// Set the gain on the effect-chain output. Has no effect while no chain
    /// runs.
    pub fn set_wet_level(&self, id: SubmixId, level: f32) -> Result<()> {
        self.state().send(id, SubmixCommand::SetWetLevel(level))
    }

    /// Silence the submix output. Analysis taps keep running.
    pub fn set_background_muted(&self, id: SubmixId, muted: bool) -> Result<()> {
        self.state().send(id, SubmixCommand::SetBackgroundMuted(muted))
    }

    // Effect chains.

    /// Make a new effect chain current, fading the previous one out.
    ///
    /// # Arguments
    ///
    /// * `id` - Submix that owns the chain.
    /// * `effects` - Stages, applied in order.
    /// * `fade_seconds` - Crossfade length. Zero swaps on the next callback.
    pub fn push_effect_chain(
        &self,
        id: SubmixId,
        effects: Vec<AudioEffect>,
        fade_seconds: f32,
    ) -> Result<()> {
        let chain = self.build_chain(effects);
        self.state().send(
            id,
            SubmixCommand::PushEffectChain {
                chain,
                fade_seconds,
            },
        )
    }

    /// Fade the current chain out and bring back the previous one, or the
    /// base chain when none is left.
    pub fn pop_effect_chain(&self, id: SubmixId, fade_seconds: f32) -> Result<()> {
        self.state()
            .send(id, SubmixCommand::PopEffectChain { fade_seconds })
    }

    /// Replace the base chain of `id`.
    ///
    /// If the old base is audible the two crossfade over the configured
    /// [`MixerConfig::fade_seconds`].
    pub fn set_base_effect_chain(&self, id: SubmixId, effects: Vec<AudioEffect>) -> Result<()> {
        let chain = self.build_chain(effects);
        self.state().send(
            id,
            SubmixCommand::SetBaseEffectChain {
                chain,
                fade_seconds: self.inner.fade_seconds,
            },
        )
    }

    /// Fade out every pushed chain and return to the base chain.
    pub fn clear_effect_chains(&self, id: SubmixId, fade_seconds: f32) -> Result<()> {
        self.state()
            .send(id, SubmixCommand::ClearEffectChains { fade_seconds })
    }

    // Sources.

    /// Create a source voice. It renders every callback but is silent in the
    /// graph until sent somewhere with [`Self::send_source`].
    ///
    /// # Arguments
    ///
    /// * `generator` - Produces the raw audio.
    /// * `settings` - Initial volume and source-level effects.
    pub fn create_source(
        &self,
        generator: Box<dyn SourceGenerator>,
        settings: SourceSettings,
    ) -> Result<SourceId> {
        let mut state = self.state();
        let id = SourceId(state.next_source);
        state.next_source += 1;
        let voice = SourceVoice::new(
            id,
            generator,
            settings,
            &self.effect_context(),
            self.max_samples(),
        );
        self.send_device(DeviceCommand::InsertSource(Box::new(voice)))?;
        state.sources.insert(id, SourceRecord::default());
        Ok(id)
    }

    /// Remove a source. Submix sends to it are pruned on their next render.
    pub fn destroy_source(&self, id: SourceId) -> Result<()> {
        let mut state = self.state();
        state
            .sources
            .remove(&id)
            .ok_or(MixerError::UnknownSource(id))?;
        self.send_device(DeviceCommand::RemoveSource(id))
    }

    /// Set the linear gain of a source. The change ramps over one callback.
    pub fn set_source_volume(&self, id: SourceId, volume: f32) -> Result<()> {
        if !self.state().sources.contains_key(&id) {
            return Err(MixerError::UnknownSource(id));
        }
        self.send_device(DeviceCommand::SetSourceVolume { source: id, volume })
    }

    /// Feed `source` into `submix`. Sending again to the same submix updates
    /// the existing send.
    ///
    /// # Arguments
    ///
    /// * `source` - Source to route.
    /// * `submix` - Destination submix.
    /// * `level` - Linear send gain.
    /// * `stage` - Mix before the submix effects or after wet/dry recombination.
    pub fn send_source(
        &self,
        source: SourceId,
        submix: SubmixId,
        level: f32,
        stage: SendStage,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.sources.contains_key(&source) {
            return Err(MixerError::UnknownSource(source));
        }
        state.send(
            submix,
            SubmixCommand::AddSend {
                source,
                level,
                stage,
            },
        )?;
        if let Some(record) = state.sources.get_mut(&source) {
            if !record.sends.contains(&submix) {
                record.sends.push(submix);
            }
        }
        Ok(())
    }

    /// Stop feeding `source` into `submix`.
    pub fn remove_send(&self, source: SourceId, submix: SubmixId) -> Result<()> {
        let mut state = self.state();
        state.send(submix, SubmixCommand::RemoveSend(source))?;
        if let Some(record) = state.sources.get_mut(&source) {
            record.sends.retain(|&s| s != submix);
        }
        Ok(())
    }

    // Listeners and analysis.

    fn shared(&self, id: SubmixId) -> Result<Arc<SubmixShared>> {
        Ok(self.state().submix(id)?.shared.clone())
    }

    /// Call `listener` with the final buffer of `id` on every callback.
    ///
    /// Listeners run on the render thread and must not block.
    pub fn register_buffer_listener(
        &self,
        id: SubmixId,
        listener: Arc<dyn SubmixBufferListener>,
    ) -> Result<()> {
        self.shared(id)?.add_listener(listener);
        Ok(())
    }

    /// Remove a listener added with [`Self::register_buffer_listener`].
    /// Returns `false` if it was not registered.
    pub fn unregister_buffer_listener(
        &self,
        id: SubmixId,
        listener: &Arc<dyn SubmixBufferListener>,
    ) -> Result<bool> {
        Ok(self.shared(id)?.remove_listener(listener))
    }

    /// Start capturing the pre-mute signal of `id`, discarding any earlier take.
    pub fn start_recording(&self, id: SubmixId) -> Result<()> {
        let reserve = self.max_samples() * RECORDING_RESERVE_CALLBACKS;
        self.shared(id)?
            .start_recording(self.inner.channels, self.inner.sample_rate, reserve);
        Ok(())
    }

    /// Stop capturing and take everything recorded so far.
    pub fn stop_recording(&self, id: SubmixId) -> Result<RecordedAudio> {
        Ok(self.shared(id)?.stop_recording())
    }

    /// Track the per-channel envelope of `id`.
    ///
    /// # Arguments
    ///
    /// * `id` - Submix to follow.
    /// * `settings` - Attack and release times.
    pub fn start_envelope_following(&self, id: SubmixId, settings: EnvelopeSettings) -> Result<()> {
        let followers = (0..MAX_OUTPUT_CHANNELS)
            .map(|_| EnvelopeFollower::new(settings, self.inner.sample_rate))
            .collect();
        self.state()
            .send(id, SubmixCommand::StartEnvelopeFollowing(followers))
    }

    /// Stop tracking the envelope; [`Self::envelope_values`] becomes empty.
    pub fn stop_envelope_following(&self, id: SubmixId) -> Result<()> {
        self.state().send(id, SubmixCommand::StopEnvelopeFollowing)
    }

    /// Latest envelope value per channel; empty when not following.
    pub fn envelope_values(&self, id: SubmixId) -> Result<Vec<f32>> {
        Ok(self.shared(id)?.envelope_values())
    }

    /// Start an FFT analyzer over the mono downmix of `id`.
    pub fn start_spectrum_analysis(&self, id: SubmixId, settings: SpectrumSettings) -> Result<()> {
        let analyzer = SpectrumAnalyzer::new(settings, self.inner.sample_rate);
        self.shared(id)?.set_analyzer(Some(analyzer));
        Ok(())
    }

    /// Drop the analyzer of `id`.
    pub fn stop_spectrum_analysis(&self, id: SubmixId) -> Result<()> {
        self.shared(id)?.set_analyzer(None);
        Ok(())
    }

    /// Magnitude of every bin from the latest analysis, or `None` when no
    /// analyzer runs or none has completed yet.
    pub fn spectrum_magnitudes(&self, id: SubmixId) -> Result<Option<Vec<f32>>> {
        Ok(self.shared(id)?.spectrum_magnitudes())
    }

    /// Magnitude of the bin nearest `hz`.
    pub fn band_magnitude(&self, id: SubmixId, hz: f32) -> Result<Option<f32>> {
        Ok(self.shared(id)?.band_magnitude(hz))
    }

    // Device.

    /// Replace the device-wide render settings (effect bypass, debug tone).
    pub fn set_render_settings(&self, settings: RenderSettings) -> Result<()> {
        self.send_device(DeviceCommand::SetRenderSettings(settings))
    }

    /// Listener orientation handed to soundfield encoders and decoders.
    pub fn set_listener_rotation(&self, rotation: Rotation) -> Result<()> {
        self.send_device(DeviceCommand::SetListenerRotation(rotation))
    }

    /// Set the tempo used by [`Self::schedule_quantized`].
    ///
    /// # Arguments
    ///
    /// * `bpm` - Beats per minute.
    /// * `beats_per_bar` - Beats in one bar.
    pub fn set_tempo(&self, bpm: f64, beats_per_bar: u32) -> Result<()> {
        self.send_device(DeviceCommand::SetTempo { bpm, beats_per_bar })
    }

    /// Apply `command` on the render thread at the next `quantization`
    /// boundary. The command is not validated against the graph.
    pub fn schedule_quantized(
        &self,
        quantization: Quantization,
        command: DeviceCommand,
    ) -> Result<()> {
        self.send_device(DeviceCommand::Quantized {
            quantization,
            command: Box::new(command),
        })
    }

    /// Free everything the render thread has handed back. Returns the number
    /// of objects released.
    pub fn collect_garbage(&self) -> usize {
        let mut garbage = self
            .inner
            .garbage
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut freed = 0;
        for item in garbage.drain() {
            match item {
                Garbage::Submix(node) => log::trace!("freed {}", node.id()),
                Garbage::Source(voice) => log::trace!("freed {}", voice.id()),
                Garbage::Endpoint(_) => log::trace!("freed endpoint sink"),
            }
            freed += 1;
        }
        freed
    }
}

impl std::fmt::Debug for MixerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MixerHandle")
            .field("sample_rate", &self.inner.sample_rate)
            .field("channels", &self.inner.channels)
            .field("submixes", &state.submixes.len())
            .field("sources", &state.sources.len())
            .field("master", &state.master)
            .finish()
    }
}
