//! Commands shipped from control threads to the render thread.
//!
//! Everything the control side changes travels through one of two lock-free
//! MPSC queues: [`DeviceCommand`] for graph-wide changes (registering nodes,
//! sources, endpoints, render settings) and [`SubmixCommand`] for one node's
//! processing state. The render thread drains the device queue once at the
//! start of a callback and each node drains its own queue when it is rendered,
//! so every callback sees a stable snapshot.
//!
//! Anything that allocates (nodes, effect chains, envelope followers,
//! soundfield streams) is built on the control thread and moved in boxed.

use crate::dsp::envelope::EnvelopeFollower;
use crate::mixer::chain::EffectChain;
use crate::mixer::clock::Quantization;
use crate::mixer::source::SourceVoice;
use crate::mixer::submix::{ChildSoundfield, SubmixNode};
use crate::mixer::types::{RenderSettings, SendStage, SourceId, SubmixId};
use crate::output::AudioEndpoint;
use crate::soundfield::{Rotation, SoundfieldDecoder};

/// Changes to one submix, applied when that submix is next rendered.
pub enum SubmixCommand {
    AddChild {
        child: SubmixId,
        soundfield: Option<Box<ChildSoundfield>>,
    },
    RemoveChild(SubmixId),
    SetParent(Option<SubmixId>),

    SetOutputVolume(f32),
    SetDryLevel(f32),
    SetWetLevel(f32),
    SetBackgroundMuted(bool),

    PushEffectChain {
        chain: EffectChain,
        fade_seconds: f32,
    },
    PopEffectChain {
        fade_seconds: f32,
    },
    SetBaseEffectChain {
        chain: EffectChain,
        fade_seconds: f32,
    },
    ClearEffectChains {
        fade_seconds: f32,
    },

    AddSend {
        source: SourceId,
        level: f32,
        stage: SendStage,
    },
    RemoveSend(SourceId),

    /// One follower per possible output channel.
    StartEnvelopeFollowing(Vec<EnvelopeFollower>),
    StopEnvelopeFollowing,

    /// Decoder used when a soundfield node renders into PCM.
    SetSoundfieldDecoder(Option<Box<dyn SoundfieldDecoder>>),
}

impl std::fmt::Debug for SubmixCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddChild { child, soundfield } => f
                .debug_struct("AddChild")
                .field("child", child)
                .field("soundfield", &soundfield.is_some())
                .finish(),
            Self::RemoveChild(id) => f.debug_tuple("RemoveChild").field(id).finish(),
            Self::SetParent(id) => f.debug_tuple("SetParent").field(id).finish(),
            Self::SetOutputVolume(v) => f.debug_tuple("SetOutputVolume").field(v).finish(),
            Self::SetDryLevel(v) => f.debug_tuple("SetDryLevel").field(v).finish(),
            Self::SetWetLevel(v) => f.debug_tuple("SetWetLevel").field(v).finish(),
            Self::SetBackgroundMuted(v) => f.debug_tuple("SetBackgroundMuted").field(v).finish(),
            Self::PushEffectChain { chain, fade_seconds } => f
                .debug_struct("PushEffectChain")
                .field("chain", chain)
                .field("fade_seconds", fade_seconds)
                .finish(),
            Self::PopEffectChain { fade_seconds } => f
                .debug_struct("PopEffectChain")
                .field("fade_seconds", fade_seconds)
                .finish(),
            Self::SetBaseEffectChain { chain, fade_seconds } => f
                .debug_struct("SetBaseEffectChain")
                .field("chain", chain)
                .field("fade_seconds", fade_seconds)
                .finish(),
            Self::ClearEffectChains { fade_seconds } => f
                .debug_struct("ClearEffectChains")
                .field("fade_seconds", fade_seconds)
                .finish(),
            Self::AddSend {
                source,
                level,
                stage,
            } => f
                .debug_struct("AddSend")
                .field("source", source)
                .field("level", level)
                .field("stage", stage)
                .finish(),
            Self::RemoveSend(id) => f.debug_tuple("RemoveSend").field(id).finish(),
            Self::StartEnvelopeFollowing(followers) => f
                .debug_tuple("StartEnvelopeFollowing")
                .field(&followers.len())
                .finish(),
            Self::StopEnvelopeFollowing => f.write_str("StopEnvelopeFollowing"),
            Self::SetSoundfieldDecoder(decoder) => f
                .debug_tuple("SetSoundfieldDecoder")
                .field(&decoder.is_some())
                .finish(),
        }
    }
}

/// Graph-wide changes, applied at the start of the next callback.
pub enum DeviceCommand {
    /// Register a node built on the control thread.
    InsertSubmix(Box<SubmixNode>),
    /// Unregister a node; it is shipped back for disposal.
    RemoveSubmix(SubmixId),
    SetMaster(Option<SubmixId>),
    AddDefaultEndpoint(SubmixId),
    AddExternalEndpoint {
        id: SubmixId,
        sink: Box<dyn AudioEndpoint>,
    },
    RemoveEndpoint(SubmixId),

    InsertSource(Box<SourceVoice>),
    RemoveSource(SourceId),
    SetSourceVolume {
        source: SourceId,
        volume: f32,
    },

    SetRenderSettings(RenderSettings),
    SetListenerRotation(Rotation),
    SetTempo {
        bpm: f64,
        beats_per_bar: u32,
    },
    /// Apply `command` on the next beat or bar boundary.
    Quantized {
        quantization: Quantization,
        command: Box<DeviceCommand>,
    },
}

impl std::fmt::Debug for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertSubmix(node) => f.debug_tuple("InsertSubmix").field(&node.id()).finish(),
            Self::RemoveSubmix(id) => f.debug_tuple("RemoveSubmix").field(id).finish(),
            Self::SetMaster(id) => f.debug_tuple("SetMaster").field(id).finish(),
            Self::AddDefaultEndpoint(id) => f.debug_tuple("AddDefaultEndpoint").field(id).finish(),
            Self::AddExternalEndpoint { id, .. } => f
                .debug_struct("AddExternalEndpoint")
                .field("id", id)
                .finish_non_exhaustive(),
            Self::RemoveEndpoint(id) => f.debug_tuple("RemoveEndpoint").field(id).finish(),
            Self::InsertSource(voice) => f.debug_tuple("InsertSource").field(&voice.id()).finish(),
            Self::RemoveSource(id) => f.debug_tuple("RemoveSource").field(id).finish(),
            Self::SetSourceVolume { source, volume } => f
                .debug_struct("SetSourceVolume")
                .field("source", source)
                .field("volume", volume)
                .finish(),
            Self::SetRenderSettings(settings) => {
                f.debug_tuple("SetRenderSettings").field(settings).finish()
            }
            Self::SetListenerRotation(rotation) => {
                f.debug_tuple("SetListenerRotation").field(rotation).finish()
            }
            Self::SetTempo { bpm, beats_per_bar } => f
                .debug_struct("SetTempo")
                .field("bpm", bpm)
                .field("beats_per_bar", beats_per_bar)
                .finish(),
            Self::Quantized {
                quantization,
                command,
            } => f
                .debug_struct("Quantized")
                .field("quantization", quantization)
                .field("command", command)
                .finish(),
        }
    }
}

/// Objects the render thread hands back so they are freed off the render
/// thread, by [`crate::mixer::MixerHandle::collect_garbage`].
pub enum Garbage {
    Submix(Box<SubmixNode>),
    Source(Box<SourceVoice>),
    Endpoint(Box<dyn AudioEndpoint>),
}
