//! JSON configuration: mixer device settings and whole-graph descriptions.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::effects::{AudioEffect, GainEffect};
use crate::dsp::envelope::EnvelopeSettings;
use crate::dsp::level::deserialize_linear_gain;
use crate::dsp::spectrum::SpectrumSettings;
use crate::error::{MixerError, Result};
use crate::mixer::{
    EndpointKind, GeneratorConfig, MixerHandle, RenderSettings, SendStage, SourceId,
    SourceSettings, SubmixDescriptor, SubmixId, MAX_OUTPUT_CHANNELS,
};
use crate::output::{CaptureEndpoint, CaptureReader, SampleFormat};
use crate::soundfield::SoundfieldFormat;

/// Device-level settings of one mixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames_per_callback: usize,
    pub output_format: SampleFormat,
    #[serde(deserialize_with = "deserialize_linear_gain")]
    pub final_output_gain: f32,
    /// Render callbacks the output ring holds.
    pub circular_buffer_quanta: usize,
    /// Submixes that may exist at once. The render-thread registry is
    /// allocated for this many up front.
    pub max_submixes: usize,
    /// Crossfade used when a base effect chain is replaced.
    pub fade_seconds: f32,
    pub render: RenderSettings,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_callback: 512,
            output_format: SampleFormat::Float,
            final_output_gain: 1.0,
            circular_buffer_quanta: 2,
            max_submixes: 256,
            fade_seconds: 0.05,
            render: RenderSettings::default(),
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_OUTPUT_CHANNELS {
            return Err(MixerError::InvalidChannelCount(self.channels));
        }
        if self.sample_rate == 0 {
            return Err(MixerError::Config("sample_rate must be positive".into()));
        }
        if self.frames_per_callback == 0 {
            return Err(MixerError::Config(
                "frames_per_callback must be positive".into(),
            ));
        }
        if self.circular_buffer_quanta == 0 {
            return Err(MixerError::Config(
                "circular_buffer_quanta must be at least 1".into(),
            ));
        }
        if self.max_submixes == 0 {
            return Err(MixerError::Config("max_submixes must be at least 1".into()));
        }
        if !self.fade_seconds.is_finite() || self.fade_seconds < 0.0 {
            return Err(MixerError::Config(format!(
                "fade_seconds {} is not a valid duration",
                self.fade_seconds
            )));
        }
        if !self.final_output_gain.is_finite() || self.final_output_gain < 0.0 {
            return Err(MixerError::Config(format!(
                "final_output_gain {} is not a valid gain",
                self.final_output_gain
            )));
        }
        Ok(())
    }

    pub fn samples_per_callback(&self) -> usize {
        self.channels * self.frames_per_callback
    }
}

/// A source send as written in a graph file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    pub submix: String,
    #[serde(default = "unit_gain", deserialize_with = "deserialize_linear_gain")]
    pub level: f32,
    #[serde(default)]
    pub stage: SendStage,
}

fn unit_gain() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub settings: SourceSettings,
    #[serde(default)]
    pub sends: Vec<SendConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmixConfig {
    #[serde(flatten)]
    pub descriptor: SubmixDescriptor,
    #[serde(default)]
    pub parent: Option<String>,
    /// Mix children as a passthrough soundfield.
    #[serde(default)]
    pub soundfield: bool,
    #[serde(default)]
    pub record: bool,
    #[serde(default)]
    pub envelope: Option<EnvelopeSettings>,
    #[serde(default)]
    pub spectrum: Option<SpectrumSettings>,
}

/// A complete graph: mixer settings, submixes and sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub mixer: MixerConfig,
    /// Name of the master submix. Defaults to a submix called `master`.
    #[serde(default)]
    pub master: Option<String>,
    pub submixes: Vec<SubmixConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Ids assigned while building a [`GraphConfig`].
#[derive(Debug, Default)]
pub struct BuiltGraph {
    pub submixes: HashMap<String, SubmixId>,
    pub sources: HashMap<String, SourceId>,
    /// Readers for every external endpoint, by submix name.
    pub captures: Vec<(String, CaptureReader)>,
    /// Submixes that were asked to record.
    pub recording: Vec<(String, SubmixId)>,
}

impl GraphConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GraphConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Explicit master, or the submix named `master`.
    pub fn master_name(&self) -> Option<&str> {
        match &self.master {
            Some(name) => Some(name.as_str()),
            None => self
                .submixes
                .iter()
                .find(|s| s.descriptor.name == "master")
                .map(|s| s.descriptor.name.as_str()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.mixer.validate()?;

        let mut names = HashSet::new();
        for submix in &self.submixes {
            let name = submix.descriptor.name.as_str();
            if name.is_empty() {
                return Err(MixerError::Config("submix without a name".into()));
            }
            if !names.insert(name) {
                return Err(MixerError::Config(format!("duplicate submix `{}`", name)));
            }
        }

        let parents: HashMap<&str, &str> = self
            .submixes
            .iter()
            .filter_map(|s| Some((s.descriptor.name.as_str(), s.parent.as_deref()?)))
            .collect();
        for submix in &self.submixes {
            let name = submix.descriptor.name.as_str();
            if let Some(parent) = submix.parent.as_deref() {
                if !names.contains(parent) {
                    return Err(MixerError::Config(format!(
                        "submix `{}` names unknown parent `{}`",
                        name, parent
                    )));
                }
                if submix.descriptor.endpoint.is_endpoint() {
                    return Err(MixerError::InvalidTopology(format!(
                        "endpoint `{}` cannot have a parent",
                        name
                    )));
                }
            }
            let mut current = submix.parent.as_deref();
            let mut steps = 0;
            while let Some(ancestor) = current {
                steps += 1;
                if ancestor == name || steps > self.submixes.len() {
                    return Err(MixerError::InvalidTopology(format!(
                        "submix `{}` is its own ancestor",
                        name
                    )));
                }
                current = parents.get(ancestor).copied();
            }
        }

        if let Some(master) = self.master_name() {
            if !names.contains(master) {
                return Err(MixerError::Config(format!("unknown master `{}`", master)));
            }
        }

        let mut sources = HashSet::new();
        for source in &self.sources {
            if !sources.insert(source.name.as_str()) {
                return Err(MixerError::Config(format!(
                    "duplicate source `{}`",
                    source.name
                )));
            }
            for send in &source.sends {
                if !names.contains(send.submix.as_str()) {
                    return Err(MixerError::Config(format!(
                        "source `{}` sends to unknown submix `{}`",
                        source.name, send.submix
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create every submix and source on `handle` and wire them together.
    /// `capture_callbacks` sizes the ring of each external endpoint.
    pub fn build(&self, handle: &MixerHandle, capture_callbacks: usize) -> Result<BuiltGraph> {
        self.validate()?;
        let mut built = BuiltGraph::default();

        for submix in &self.submixes {
            let mut descriptor = submix.descriptor.clone();
            if submix.soundfield {
                descriptor.soundfield = Some(SoundfieldFormat::passthrough());
            }
            let id = handle.create_submix(descriptor)?;
            built.submixes.insert(submix.descriptor.name.clone(), id);
        }

        for submix in &self.submixes {
            let id = built.submixes[&submix.descriptor.name];
            if let Some(parent) = &submix.parent {
                handle.set_parent(id, Some(built.submixes[parent]))?;
            }
            if submix.descriptor.endpoint == EndpointKind::External {
                let capacity = handle.channels() * handle.frames_per_callback() * capture_callbacks;
                let (endpoint, reader) = CaptureEndpoint::new(capacity);
                handle.attach_external_endpoint(id, Box::new(endpoint))?;
                built
                    .captures
                    .push((submix.descriptor.name.clone(), reader));
            }
            if submix.record {
                handle.start_recording(id)?;
                built.recording.push((submix.descriptor.name.clone(), id));
            }
            if let Some(settings) = submix.envelope {
                handle.start_envelope_following(id, settings)?;
            }
            if let Some(settings) = submix.spectrum {
                handle.start_spectrum_analysis(id, settings)?;
            }
        }

        if let Some(master) = self.master_name() {
            handle.set_master(Some(built.submixes[master]))?;
        }

        for source in &self.sources {
            let id = handle.create_source(source.generator.build(), source.settings.clone())?;
            for send in &source.sends {
                handle.send_source(id, built.submixes[&send.submix], send.level, send.stage)?;
            }
            built.sources.insert(source.name.clone(), id);
        }

        log::info!(
            "built graph: {} submixes, {} sources",
            built.submixes.len(),
            built.sources.len()
        );
        Ok(built)
    }

    /// Small graph used by `mixgraph create example-graph`.
    pub fn example() -> Self {
        let master = SubmixConfig {
            descriptor: SubmixDescriptor::named("master"),
            envelope: Some(EnvelopeSettings::default()),
            ..SubmixConfig::default()
        };
        let music = SubmixConfig {
            descriptor: SubmixDescriptor {
                effects: vec![AudioEffect::Gain(GainEffect::new(0.8))],
                ..SubmixDescriptor::named("music")
            },
            parent: Some("master".into()),
            ..SubmixConfig::default()
        };
        let ambience = SubmixConfig {
            descriptor: SubmixDescriptor {
                background_muted: false,
                dry_level: 0.5,
                wet_level: 0.5,
                ..SubmixDescriptor::named("ambience")
            },
            parent: Some("master".into()),
            ..SubmixConfig::default()
        };
        Self {
            mixer: MixerConfig::default(),
            master: Some("master".into()),
            submixes: vec![master, music, ambience],
            sources: vec![
                SourceConfig {
                    name: "tone".into(),
                    generator: GeneratorConfig::Sine {
                        frequency_hz: 220.0,
                        amplitude: 0.25,
                    },
                    settings: SourceSettings::default(),
                    sends: vec![SendConfig {
                        submix: "music".into(),
                        level: 1.0,
                        stage: SendStage::PreEffect,
                    }],
                },
                SourceConfig {
                    name: "hiss".into(),
                    generator: GeneratorConfig::Noise {
                        amplitude: 0.05,
                        seed: Some(1),
                    },
                    settings: SourceSettings::default(),
                    sends: vec![SendConfig {
                        submix: "ambience".into(),
                        level: 1.0,
                        stage: SendStage::PreEffect,
                    }],
                },
            ],
        }
    }
}
