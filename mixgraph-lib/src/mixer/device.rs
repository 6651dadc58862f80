//! The per-device render tick.
//!
//! [`MixerDevice`] owns everything the render thread touches: the submix
//! arena, the source voices, endpoint sinks and the clocks. One call to
//! [`MixerDevice::process_audio_stream`] produces one device callback.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::dsp::level::db_to_linear;
use crate::mixer::clock::QuantizedClock;
use crate::mixer::command::{DeviceCommand, Garbage};
use crate::mixer::graph::{RenderInputs, RenderOutcome, SubmixRegistry};
use crate::mixer::source::SourceManager;
use crate::mixer::types::{EndpointKind, LogThrottle, RenderContext, RenderSettings, SubmixId};
use crate::output::AudioEndpoint;
use crate::queue::{Consumer, Mpsc, Producer, Spsc};
use crate::soundfield::Rotation;

const DEBUG_TONE_HZ: f32 = 440.0;
const DEBUG_TONE_DB: f32 = -12.0;

struct ExternalEndpoint {
    id: SubmixId,
    sink: Box<dyn AudioEndpoint>,
}

/// Sine added to channel 0 when [`RenderSettings::debug_tone`] is on.
#[derive(Debug, Default)]
struct DebugTone {
    phase: f32,
}

impl DebugTone {
    fn mix_into(&mut self, out: &mut [f32], channels: usize, sample_rate: u32) {
        let amplitude = db_to_linear(DEBUG_TONE_DB);
        let increment = std::f32::consts::TAU * DEBUG_TONE_HZ / sample_rate.max(1) as f32;
        for frame in out.chunks_mut(channels.max(1)) {
            frame[0] += self.phase.sin() * amplitude;
            self.phase = (self.phase + increment) % std::f32::consts::TAU;
        }
    }
}

/// Render-thread side of a mixer.
pub struct MixerDevice {
    sample_rate: u32,
    channels: usize,
    frames: usize,
    settings: RenderSettings,

    registry: SubmixRegistry,
    sources: SourceManager,
    master: Option<SubmixId>,
    default_endpoints: Vec<SubmixId>,
    external_endpoints: Vec<ExternalEndpoint>,
    endpoint_buffer: Vec<f32>,

    commands: Consumer<DeviceCommand, Mpsc>,
    garbage: Producer<Garbage, Spsc>,
    clock: QuantizedClock<DeviceCommand>,
    fired: Vec<DeviceCommand>,

    listener_rotation: Rotation,
    audio_clock: f64,
    render_thread: Option<ThreadId>,
    last_callback: Option<Instant>,
    callback_interval: Duration,
    tone: DebugTone,
    endpoint_log: LogThrottle,
}

impl MixerDevice {
    pub(crate) fn new(
        sample_rate: u32,
        channels: usize,
        frames: usize,
        settings: RenderSettings,
        max_submixes: usize,
        commands: Consumer<DeviceCommand, Mpsc>,
        garbage: Producer<Garbage, Spsc>,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            frames,
            settings,
            registry: SubmixRegistry::with_capacity(max_submixes),
            sources: SourceManager::with_capacity(64),
            master: None,
            default_endpoints: Vec::with_capacity(8),
            external_endpoints: Vec::with_capacity(8),
            endpoint_buffer: Vec::with_capacity(channels * frames),
            commands,
            garbage,
            clock: QuantizedClock::new(sample_rate),
            fired: Vec::with_capacity(16),
            listener_rotation: Rotation::default(),
            audio_clock: 0.0,
            render_thread: None,
            last_callback: None,
            callback_interval: Duration::ZERO,
            tone: DebugTone::default(),
            endpoint_log: LogThrottle::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames rendered per callback.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn samples_per_callback(&self) -> usize {
        self.channels * self.frames
    }

    /// Device time in seconds, advanced once per callback.
    pub fn audio_clock(&self) -> f64 {
        self.audio_clock
    }

    /// Wall-clock time between the last two callbacks.
    pub fn callback_interval(&self) -> Duration {
        self.callback_interval
    }

    /// True when called from the thread that last rendered.
    pub fn is_render_thread(&self) -> bool {
        self.render_thread == Some(thread::current().id())
    }

    pub fn master(&self) -> Option<SubmixId> {
        self.master
    }

    pub fn registry(&self) -> &SubmixRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    pub fn render_settings(&self) -> RenderSettings {
        self.settings
    }

    pub fn endpoint_count(&self) -> usize {
        self.default_endpoints.len() + self.external_endpoints.len()
    }

    /// Render one callback into `out`, which is overwritten.
    pub fn process_audio_stream(&mut self, out: &mut [f32]) {
        self.render_thread = Some(thread::current().id());
        let now = Instant::now();
        if let Some(last) = self.last_callback {
            self.callback_interval = now.duration_since(last);
        }
        self.last_callback = Some(now);

        while let Some(command) = self.commands.dequeue() {
            self.apply(command);
        }
        let mut fired = std::mem::take(&mut self.fired);
        self.clock.update(self.frames, &mut fired);
        for command in fired.drain(..) {
            self.apply(command);
        }
        self.fired = fired;

        let ctx = RenderContext {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames: self.frames,
            audio_clock: self.audio_clock,
            settings: self.settings,
        };
        self.sources.compute_next_block(&ctx);
        out.fill(0.0);

        let inputs = RenderInputs {
            ctx,
            sources: &self.sources,
            listener_rotation: self.listener_rotation,
        };

        if let Some(master) = self.master {
            if self.registry.render_into(master, out, &inputs) == RenderOutcome::Missing
                && self.endpoint_log.ready()
            {
                log::warn!("master {} is not registered", master);
            }
        }

        for &id in &self.default_endpoints {
            if Some(id) == self.master {
                continue;
            }
            if !endpoint_kind_matches(&self.registry, id, EndpointKind::Default, &mut self.endpoint_log)
            {
                continue;
            }
            self.registry.render_into(id, out, &inputs);
        }

        for endpoint in self.external_endpoints.iter_mut() {
            if !endpoint_kind_matches(
                &self.registry,
                endpoint.id,
                EndpointKind::External,
                &mut self.endpoint_log,
            ) {
                continue;
            }
            self.endpoint_buffer.clear();
            self.endpoint_buffer.resize(ctx.samples(), 0.0);
            self.registry
                .render_into(endpoint.id, &mut self.endpoint_buffer, &inputs);
            endpoint
                .sink
                .submit(&self.endpoint_buffer, self.channels, self.sample_rate);
        }

        if self.settings.debug_tone {
            self.tone.mix_into(out, self.channels, self.sample_rate);
        }

        self.audio_clock += self.frames as f64 / self.sample_rate.max(1) as f64;
    }

    fn apply(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::InsertSubmix(node) => {
                if self.registry.is_full() {
                    log::error!(
                        "submix registry overflow at {} nodes; dropping {}",
                        self.registry.len(),
                        node.id()
                    );
                    self.dispose(Garbage::Submix(node));
                } else if let Err(node) = self.registry.insert(node) {
                    log::error!("{} is already registered", node.id());
                    self.dispose(Garbage::Submix(node));
                }
            }
            DeviceCommand::RemoveSubmix(id) => {
                if self.master == Some(id) {
                    self.master = None;
                }
                self.remove_endpoint(id);
                if let Some(node) = self.registry.remove(id) {
                    self.dispose(Garbage::Submix(node));
                }
            }
            DeviceCommand::SetMaster(id) => self.master = id,
            DeviceCommand::AddDefaultEndpoint(id) => {
                if !self.default_endpoints.contains(&id) {
                    self.default_endpoints.push(id);
                }
            }
            DeviceCommand::AddExternalEndpoint { id, sink } => {
                self.remove_endpoint(id);
                self.external_endpoints.push(ExternalEndpoint { id, sink });
            }
            DeviceCommand::RemoveEndpoint(id) => self.remove_endpoint(id),
            DeviceCommand::InsertSource(voice) => {
                if let Some(previous) = self.sources.insert(voice) {
                    self.dispose(Garbage::Source(previous));
                }
            }
            DeviceCommand::RemoveSource(id) => {
                if let Some(voice) = self.sources.remove(id) {
                    self.dispose(Garbage::Source(voice));
                }
            }
            DeviceCommand::SetSourceVolume { source, volume } => {
                if let Some(voice) = self.sources.get_mut(source) {
                    voice.set_volume(volume);
                }
            }
            DeviceCommand::SetRenderSettings(settings) => self.settings = settings,
            DeviceCommand::SetListenerRotation(rotation) => self.listener_rotation = rotation,
            DeviceCommand::SetTempo { bpm, beats_per_bar } => {
                self.clock.set_tempo(bpm, beats_per_bar)
            }
            DeviceCommand::Quantized {
                quantization,
                command,
            } => self.clock.schedule(quantization, *command),
        }
    }

    fn remove_endpoint(&mut self, id: SubmixId) {
        self.default_endpoints.retain(|&endpoint| endpoint != id);
        if let Some(index) = self.external_endpoints.iter().position(|e| e.id == id) {
            let endpoint = self.external_endpoints.swap_remove(index);
            self.dispose(Garbage::Endpoint(endpoint.sink));
        }
    }

    /// Hand `garbage` back to the control side; free it here only if the
    /// queue cannot take it.
    fn dispose(&mut self, garbage: Garbage) {
        if let Err(garbage) = self.garbage.enqueue(garbage) {
            log::warn!("garbage queue allocation failed; freeing on the render thread");
            drop(garbage);
        }
    }
}

fn endpoint_kind_matches(
    registry: &SubmixRegistry,
    id: SubmixId,
    expected: EndpointKind,
    throttle: &mut LogThrottle,
) -> bool {
    let Some(node) = registry.get(id) else {
        return false;
    };
    if node.endpoint() == expected {
        return true;
    }
    if throttle.ready() {
        log::error!(
            "{} registered as a {:?} endpoint but is {:?}; skipped",
            id,
            expected,
            node.endpoint()
        );
    }
    false
}

impl std::fmt::Debug for MixerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerDevice")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("master", &self.master)
            .field("submixes", &self.registry.len())
            .field("sources", &self.sources.len())
            .field("audio_clock", &self.audio_clock)
            .finish()
    }
}
