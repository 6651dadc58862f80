use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::dsp::effects::{AudioEffect, GainEffect};
use crate::dsp::envelope::EnvelopeSettings;
use crate::dsp::spectrum::SpectrumSettings;
use crate::error::MixerError;
use crate::output::{CaptureEndpoint, SampleFormat};
use crate::soundfield::SoundfieldFormat;

const FRAMES: usize = 8;
const CHANNELS: usize = 2;

fn config() -> MixerConfig {
    MixerConfig {
        frames_per_callback: FRAMES,
        channels: CHANNELS,
        ..MixerConfig::default()
    }
}

fn render(output: &mut OutputBuffer) -> Vec<f32> {
    assert!(output.mix_next_buffer());
    let mut block = vec![0.0; FRAMES * CHANNELS];
    assert_eq!(output.pop_float(&mut block), block.len());
    block
}

fn constant(handle: &MixerHandle, value: f32, submix: SubmixId, stage: SendStage) -> SourceId {
    let source = handle
        .create_source(
            Box::new(BufferGenerator::new(vec![value], 1, true)),
            SourceSettings::default(),
        )
        .unwrap();
    handle.send_source(source, submix, 1.0, stage).unwrap();
    source
}

fn master_with(handle: &MixerHandle, value: f32) -> SubmixId {
    let master = handle
        .create_submix(SubmixDescriptor::named("master"))
        .unwrap();
    handle.set_master(Some(master)).unwrap();
    constant(handle, value, master, SendStage::PreEffect);
    master
}

fn assert_all(block: &[f32], expected: f32) {
    for sample in block {
        assert!((sample - expected).abs() < 1e-6, "{} != {}", sample, expected);
    }
}

#[derive(Default)]
struct CountingListener {
    buffers: AtomicUsize,
}

impl SubmixBufferListener for CountingListener {
    fn on_new_submix_buffer(
        &self,
        _owner: SubmixId,
        samples: &[f32],
        channels: usize,
        _sample_rate: u32,
        _audio_clock: f64,
    ) {
        assert_eq!(samples.len(), FRAMES * channels);
        self.buffers.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn rejects_invalid_config() {
    let config = MixerConfig {
        channels: 9,
        ..config()
    };
    assert!(matches!(
        create_mixer(&config),
        Err(MixerError::InvalidChannelCount(9))
    ));
}

#[test]
fn rejects_empty_registry_and_negative_fade() {
    let empty = MixerConfig {
        max_submixes: 0,
        ..config()
    };
    assert!(matches!(create_mixer(&empty), Err(MixerError::Config(_))));
    let negative = MixerConfig {
        fade_seconds: -1.0,
        ..config()
    };
    assert!(matches!(create_mixer(&negative), Err(MixerError::Config(_))));
}

#[test]
fn submix_capacity_is_enforced() {
    let config = MixerConfig {
        max_submixes: 2,
        ..config()
    };
    let (handle, mut output) = create_mixer(&config).unwrap();
    let first = handle.create_submix(SubmixDescriptor::named("a")).unwrap();
    handle.create_submix(SubmixDescriptor::named("b")).unwrap();
    assert!(matches!(
        handle.create_submix(SubmixDescriptor::named("c")),
        Err(MixerError::RegistryFull(2))
    ));
    render(&mut output);
    assert_eq!(output.device().registry().len(), 2);

    // Destroying frees a place for the next one.
    handle.destroy_submix(first).unwrap();
    handle.create_submix(SubmixDescriptor::named("c")).unwrap();
    render(&mut output);
    assert_eq!(output.device().registry().len(), 2);
    assert_eq!(handle.submix_count(), 2);
}

#[test]
fn destroying_a_middle_submix_detaches_both_sides() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.25);
    let bus = handle.create_submix(SubmixDescriptor::named("bus")).unwrap();
    let leaf = handle.create_submix(SubmixDescriptor::named("leaf")).unwrap();
    handle.set_parent(bus, Some(master)).unwrap();
    handle.set_parent(leaf, Some(bus)).unwrap();
    constant(&handle, 0.5, leaf, SendStage::PreEffect);
    assert_all(&render(&mut output), 0.75);

    handle.destroy_submix(bus).unwrap();
    assert!(handle.children_of(master).unwrap().is_empty());
    assert_eq!(handle.parent_of(leaf).unwrap(), None);
    assert_all(&render(&mut output), 0.25);
    let registry = output.device().registry();
    assert!(registry.get(master).unwrap().children().next().is_none());
    assert!(!registry.contains(bus));
}

#[test]
fn master_and_children_reach_the_output() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.25);
    let child = handle
        .create_submix(SubmixDescriptor::named("music"))
        .unwrap();
    handle.set_parent(child, Some(master)).unwrap();
    constant(&handle, 0.5, child, SendStage::PreEffect);

    assert_all(&render(&mut output), 0.75);
    assert_eq!(handle.children_of(master).unwrap(), vec![child]);
    assert_eq!(handle.parent_of(child).unwrap(), Some(master));
    assert_eq!(handle.submix_by_name("music"), Some(child));
}

#[test]
fn without_master_output_is_silent() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let submix = handle.create_submix(SubmixDescriptor::named("a")).unwrap();
    constant(&handle, 0.5, submix, SendStage::PreEffect);
    assert_all(&render(&mut output), 0.0);
}

#[test]
fn topology_errors_are_reported() {
    let (handle, _output) = create_mixer(&config()).unwrap();
    let a = handle.create_submix(SubmixDescriptor::named("a")).unwrap();
    let b = handle.create_submix(SubmixDescriptor::named("b")).unwrap();
    let endpoint = handle
        .create_submix(SubmixDescriptor {
            endpoint: EndpointKind::Default,
            ..SubmixDescriptor::named("speakers")
        })
        .unwrap();

    assert!(matches!(
        handle.set_parent(a, Some(a)),
        Err(MixerError::InvalidTopology(_))
    ));
    handle.set_parent(b, Some(a)).unwrap();
    assert!(matches!(
        handle.set_parent(a, Some(b)),
        Err(MixerError::InvalidTopology(_))
    ));
    assert!(matches!(
        handle.set_parent(endpoint, Some(a)),
        Err(MixerError::InvalidTopology(_))
    ));
    assert!(matches!(
        handle.set_parent(a, Some(SubmixId(99))),
        Err(MixerError::UnknownSubmix(_))
    ));
    assert!(matches!(
        handle.set_output_volume(SubmixId(99), 0.5),
        Err(MixerError::UnknownSubmix(_))
    ));
    assert!(matches!(
        handle.destroy_source(SourceId(42)),
        Err(MixerError::UnknownSource(_))
    ));
    assert!(matches!(
        handle.attach_external_endpoint(a, Box::new(CaptureEndpoint::new(16).0)),
        Err(MixerError::InvalidTopology(_))
    ));
}

#[test]
fn reparenting_moves_the_child() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.0);
    let other = handle.create_submix(SubmixDescriptor::named("other")).unwrap();
    let child = handle.create_submix(SubmixDescriptor::named("child")).unwrap();
    constant(&handle, 0.5, child, SendStage::PreEffect);

    handle.set_parent(child, Some(master)).unwrap();
    assert_all(&render(&mut output), 0.5);

    handle.set_parent(child, Some(other)).unwrap();
    assert!(handle.children_of(master).unwrap().is_empty());
    assert_all(&render(&mut output), 0.0);
}

#[test]
fn final_gain_and_int16_output() {
    let config = MixerConfig {
        output_format: SampleFormat::Int16,
        final_output_gain: 0.5,
        ..config()
    };
    let (handle, mut output) = create_mixer(&config).unwrap();
    master_with(&handle, 4.0);
    assert!(output.mix_next_buffer());
    let mut block = vec![0_i16; FRAMES * CHANNELS];
    assert_eq!(output.pop_i16(&mut block), block.len());
    assert!(block.iter().all(|&s| s == 32767));
}

#[test]
fn float_output_is_clamped() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    master_with(&handle, -3.0);
    assert_all(&render(&mut output), -1.0);
}

#[test]
fn full_ring_skips_callbacks() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    master_with(&handle, 0.5);
    assert_eq!(output.fill(), 2);
    assert_eq!(output.remaining(), 0);
    assert!(!output.mix_next_buffer());

    let mut block = vec![0.0; FRAMES * CHANNELS];
    output.pop_float(&mut block);
    assert!(output.mix_next_buffer());
    assert_eq!(output.len(), 2 * FRAMES * CHANNELS);
}

#[test]
fn destroyed_objects_come_back_as_garbage() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    let child = handle.create_submix(SubmixDescriptor::named("child")).unwrap();
    handle.set_parent(child, Some(master)).unwrap();
    let source = constant(&handle, 0.5, child, SendStage::PreEffect);
    render(&mut output);
    assert_eq!(handle.collect_garbage(), 0);

    handle.destroy_submix(child).unwrap();
    handle.destroy_source(source).unwrap();
    assert_all(&render(&mut output), 0.5);
    assert_eq!(handle.collect_garbage(), 2);
    assert_eq!(handle.submix_count(), 1);
    assert!(handle.children_of(master).unwrap().is_empty());

    handle.destroy_submix(master).unwrap();
    assert_eq!(handle.master(), None);
    assert_all(&render(&mut output), 0.0);
    assert_eq!(output.device().master(), None);
    assert_eq!(handle.collect_garbage(), 1);
}

#[test]
fn default_endpoints_sum_into_the_output() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let speakers = handle
        .create_submix(SubmixDescriptor {
            endpoint: EndpointKind::Default,
            ..SubmixDescriptor::named("speakers")
        })
        .unwrap();
    constant(&handle, 0.25, speakers, SendStage::PreEffect);
    master_with(&handle, 0.5);
    assert_all(&render(&mut output), 0.75);
    assert_eq!(output.device().endpoint_count(), 1);

    handle.detach_endpoint(speakers).unwrap();
    assert_all(&render(&mut output), 0.5);
}

#[test]
fn master_registered_as_endpoint_renders_once() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let speakers = handle
        .create_submix(SubmixDescriptor {
            endpoint: EndpointKind::Default,
            ..SubmixDescriptor::named("speakers")
        })
        .unwrap();
    handle.set_master(Some(speakers)).unwrap();
    constant(&handle, 0.25, speakers, SendStage::PreEffect);
    assert_all(&render(&mut output), 0.25);
}

#[test]
fn misclassified_endpoint_is_skipped() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let plain = handle.create_submix(SubmixDescriptor::named("plain")).unwrap();
    constant(&handle, 0.5, plain, SendStage::PreEffect);
    handle
        .schedule_quantized(
            Quantization::Immediate,
            DeviceCommand::AddDefaultEndpoint(plain),
        )
        .unwrap();
    assert_all(&render(&mut output), 0.0);
    assert_eq!(output.device().endpoint_count(), 1);
}

#[test]
fn external_endpoint_feeds_its_sink_only() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let external = handle
        .create_submix(SubmixDescriptor {
            endpoint: EndpointKind::External,
            ..SubmixDescriptor::named("stream")
        })
        .unwrap();
    constant(&handle, 0.5, external, SendStage::PreEffect);
    let (sink, reader) = CaptureEndpoint::new(FRAMES * CHANNELS * 4);
    handle
        .attach_external_endpoint(external, Box::new(sink))
        .unwrap();

    assert_all(&render(&mut output), 0.0);
    assert_all(&render(&mut output), 0.0);
    let mut captured = Vec::new();
    assert_eq!(reader.drain_into(&mut captured), 2 * FRAMES * CHANNELS);
    assert_all(&captured, 0.5);

    handle.destroy_submix(external).unwrap();
    render(&mut output);
    assert_eq!(output.device().endpoint_count(), 0);
    // The node and its sink.
    assert_eq!(handle.collect_garbage(), 2);
}

#[test]
fn debug_tone_lands_on_channel_zero() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    handle
        .set_render_settings(RenderSettings {
            debug_tone: true,
            ..RenderSettings::default()
        })
        .unwrap();
    let block = render(&mut output);
    assert!(block.iter().step_by(CHANNELS).any(|s| s.abs() > 0.0));
    assert!(block.iter().skip(1).step_by(CHANNELS).all(|&s| s == 0.0));
    assert!(block.iter().all(|s| s.abs() <= 0.26));
}

#[test]
fn bypass_setting_reaches_submixes() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    handle
        .set_base_effect_chain(master, vec![AudioEffect::Gain(GainEffect::new(0.5))])
        .unwrap();
    assert_all(&render(&mut output), 0.25);

    handle
        .set_render_settings(RenderSettings {
            bypass_submix_effects: true,
            ..RenderSettings::default()
        })
        .unwrap();
    assert_all(&render(&mut output), 0.5);
}

#[test]
fn base_chain_swap_uses_the_configured_fade() {
    let gain = |value| vec![AudioEffect::Gain(GainEffect::new(value))];

    let instant = MixerConfig {
        fade_seconds: 0.0,
        ..config()
    };
    let (handle, mut output) = create_mixer(&instant).unwrap();
    let master = master_with(&handle, 0.5);
    handle.set_base_effect_chain(master, gain(0.5)).unwrap();
    assert_all(&render(&mut output), 0.25);
    handle.set_base_effect_chain(master, gain(2.0)).unwrap();
    assert_all(&render(&mut output), 1.0);

    // Two callbacks of crossfade.
    let faded = MixerConfig {
        fade_seconds: (2 * FRAMES) as f32 / 48_000.0,
        ..config()
    };
    let (handle, mut output) = create_mixer(&faded).unwrap();
    assert_eq!(handle.fade_seconds(), faded.fade_seconds);
    let master = master_with(&handle, 0.5);
    handle.set_base_effect_chain(master, gain(0.5)).unwrap();
    assert_all(&render(&mut output), 0.25);
    handle.set_base_effect_chain(master, gain(2.0)).unwrap();
    let block = render(&mut output);
    assert!((block[0] - 0.25).abs() < 1e-6);
    let last = block[block.len() - 1];
    assert!(last > 0.3 && last < 0.9, "{}", last);
    for _ in 0..3 {
        render(&mut output);
    }
    assert_all(&render(&mut output), 1.0);
}

#[test]
fn pushed_chain_replaces_and_pops_back() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    handle
        .push_effect_chain(master, vec![AudioEffect::Gain(GainEffect::new(0.5))], 0.0)
        .unwrap();
    assert_all(&render(&mut output), 0.25);

    handle.pop_effect_chain(master, 0.0).unwrap();
    assert_all(&render(&mut output), 0.5);
}

#[test]
fn quantized_commands_wait_for_the_beat() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let submix = handle.create_submix(SubmixDescriptor::named("late")).unwrap();
    constant(&handle, 0.5, submix, SendStage::PreEffect);
    // 48 kHz at 6000 bpm: a beat every 480 frames.
    handle.set_tempo(6000.0, 4).unwrap();
    render(&mut output);

    handle
        .schedule_quantized(Quantization::Beat, DeviceCommand::SetMaster(Some(submix)))
        .unwrap();
    let mut silent = 0;
    loop {
        let block = render(&mut output);
        if block[0] != 0.0 {
            break;
        }
        silent += 1;
        assert!(silent < 100, "quantized command never fired");
    }
    assert_eq!(silent, 480 / FRAMES - 1);
    assert_eq!(output.device().master(), Some(submix));
}

#[test]
fn soundfield_master_decodes_to_the_device() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let field = handle
        .create_submix(SubmixDescriptor {
            soundfield: Some(SoundfieldFormat::passthrough()),
            ..SubmixDescriptor::named("field")
        })
        .unwrap();
    let child = handle.create_submix(SubmixDescriptor::named("pcm")).unwrap();
    handle.set_parent(child, Some(field)).unwrap();
    constant(&handle, 0.5, child, SendStage::PreEffect);

    handle.set_master(Some(field)).unwrap();
    assert_all(&render(&mut output), 0.5);

    // Under a PCM parent it decodes for that parent instead.
    handle.set_master(None).unwrap();
    let pcm = master_with(&handle, 0.0);
    handle.set_parent(field, Some(pcm)).unwrap();
    assert_all(&render(&mut output), 0.5);
}

#[test]
fn listeners_see_every_callback() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    let listener = Arc::new(CountingListener::default());
    let dyn_listener: Arc<dyn SubmixBufferListener> = listener.clone();
    handle
        .register_buffer_listener(master, dyn_listener.clone())
        .unwrap();

    for _ in 0..3 {
        render(&mut output);
    }
    assert_eq!(listener.buffers.load(Ordering::SeqCst), 3);

    assert!(handle
        .unregister_buffer_listener(master, &dyn_listener)
        .unwrap());
    render(&mut output);
    assert_eq!(listener.buffers.load(Ordering::SeqCst), 3);
}

#[test]
fn recording_captures_rendered_callbacks() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    handle.start_recording(master).unwrap();
    for _ in 0..3 {
        render(&mut output);
    }
    let recorded = handle.stop_recording(master).unwrap();
    assert_eq!(recorded.channels, CHANNELS);
    assert_eq!(recorded.sample_rate, 48_000);
    assert_eq!(recorded.frames(), 3 * FRAMES);
    assert_all(&recorded.samples, 0.5);

    render(&mut output);
    assert!(handle.stop_recording(master).unwrap().samples.is_empty());
}

#[test]
fn envelope_follows_the_signal() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = master_with(&handle, 0.5);
    assert!(handle.envelope_values(master).unwrap().is_empty());

    handle
        .start_envelope_following(master, EnvelopeSettings::default())
        .unwrap();
    render(&mut output);
    let values = handle.envelope_values(master).unwrap();
    assert_eq!(values.len(), CHANNELS);
    assert!(values.iter().all(|&v| v > 0.0 && v <= 0.5));
}

#[test]
fn spectrum_finds_the_tone() {
    let config = MixerConfig {
        frames_per_callback: 64,
        ..config()
    };
    let (handle, mut output) = create_mixer(&config).unwrap();
    let master = handle
        .create_submix(SubmixDescriptor::named("master"))
        .unwrap();
    handle.set_master(Some(master)).unwrap();
    let tone = handle
        .create_source(
            Box::new(SineGenerator::new(3000.0, 0.5)),
            SourceSettings::default(),
        )
        .unwrap();
    handle
        .send_source(tone, master, 1.0, SendStage::PreEffect)
        .unwrap();
    handle
        .start_spectrum_analysis(
            master,
            SpectrumSettings {
                fft_size: 64,
                hop_size: 32,
            },
        )
        .unwrap();
    assert_eq!(handle.spectrum_magnitudes(master).unwrap(), None);

    for _ in 0..2 {
        assert!(output.mix_next_buffer());
        let mut block = vec![0.0; 64 * CHANNELS];
        output.pop_float(&mut block);
    }
    let magnitudes = handle.spectrum_magnitudes(master).unwrap().unwrap();
    assert!(!magnitudes.is_empty());
    let peak = handle.band_magnitude(master, 3000.0).unwrap().unwrap();
    let far = handle.band_magnitude(master, 15_000.0).unwrap().unwrap();
    assert!(peak > far * 10.0);

    handle.stop_spectrum_analysis(master).unwrap();
    assert_eq!(handle.spectrum_magnitudes(master).unwrap(), None);
}

#[test]
fn source_volume_and_post_effect_sends() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let master = handle
        .create_submix(SubmixDescriptor::named("master"))
        .unwrap();
    handle.set_master(Some(master)).unwrap();
    handle
        .set_base_effect_chain(master, vec![AudioEffect::Gain(GainEffect::new(0.0))])
        .unwrap();
    let source = constant(&handle, 0.5, master, SendStage::PostEffect);
    assert_all(&render(&mut output), 0.5);

    handle.set_source_volume(source, 0.5).unwrap();
    render(&mut output);
    assert_all(&render(&mut output), 0.25);

    handle.remove_send(source, master).unwrap();
    assert_all(&render(&mut output), 0.0);
}

#[test]
fn handle_clones_drive_the_same_mixer() {
    let (handle, mut output) = create_mixer(&config()).unwrap();
    let clone = handle.clone();
    let master = master_with(&clone, 0.5);
    assert_eq!(handle.master(), Some(master));
    assert_all(&render(&mut output), 0.5);
    assert!(output.device().is_render_thread());
    assert!(output.device().audio_clock() > 0.0);
}
