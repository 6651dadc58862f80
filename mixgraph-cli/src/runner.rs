//! Subcommand dispatch and the offline render loop.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::ArgMatches;
use log::{debug, info, warn};
use mixgraph_lib::config::{BuiltGraph, GraphConfig, MixerConfig};
use mixgraph_lib::{create_mixer, MixerError, MixerHandle, OutputBuffer, SampleFormat};

use crate::cli;
use crate::error::CliError;

/// Callbacks each external capture ring holds between drains.
const CAPTURE_CALLBACKS: usize = 8;

type WavWriter = hound::WavWriter<BufWriter<File>>;

pub fn run(args: &ArgMatches) -> Result<i32, CliError> {
    let quiet = args.get_flag("quiet");
    match args.subcommand() {
        Some(("render", sub)) => render(sub, quiet),
        Some(("describe", sub)) => {
            let graph = load_graph(sub)?;
            print!("{}", cli::describe::describe(&graph));
            Ok(0)
        }
        Some(("create", sub)) => match sub.subcommand() {
            Some(("example-graph", _)) => {
                println!("{}", GraphConfig::example().to_json_pretty()?);
                Ok(0)
            }
            Some(("mixer-config", _)) => {
                let json = serde_json::to_string_pretty(&MixerConfig::default())
                    .map_err(MixerError::from)?;
                println!("{}", json);
                Ok(0)
            }
            _ => Err(CliError::Usage("create needs a payload name".into())),
        },
        _ => Err(CliError::Usage("missing subcommand".into())),
    }
}

fn load_graph(args: &ArgMatches) -> Result<GraphConfig, CliError> {
    let path = args
        .get_one::<String>("GRAPH")
        .ok_or_else(|| CliError::Usage("missing graph path".into()))?;
    info!("loading graph {}", path);
    Ok(GraphConfig::load(path)?)
}

fn render(args: &ArgMatches, quiet: bool) -> Result<i32, CliError> {
    let mut graph = load_graph(args)?;
    let seconds = args.get_one::<f64>("seconds").copied().unwrap_or(1.0);
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CliError::Usage(format!(
            "--seconds must be positive, got {}",
            seconds
        )));
    }
    match args.get_one::<String>("format").map(String::as_str) {
        Some("int16") => graph.mixer.output_format = SampleFormat::Int16,
        Some("float") => graph.mixer.output_format = SampleFormat::Float,
        _ => {}
    }
    graph.mixer.render.debug_tone |= args.get_flag("debug-tone");
    graph.mixer.render.bypass_submix_effects |= args.get_flag("bypass-effects");
    let out_path = PathBuf::from(
        args.get_one::<String>("out")
            .map(String::as_str)
            .unwrap_or("mixgraph.wav"),
    );

    let config = graph.mixer.clone();
    let (handle, mut output) = create_mixer(&config)?;
    let built = graph.build(&handle, CAPTURE_CALLBACKS)?;

    let total_frames = (seconds * config.sample_rate as f64).round() as usize;
    let callbacks = total_frames.div_ceil(config.frames_per_callback).max(1);
    info!(
        "rendering {} callbacks of {} frames to {}",
        callbacks,
        config.frames_per_callback,
        out_path.display()
    );

    let mut writer = hound::WavWriter::create(
        &out_path,
        wav_spec(config.channels, config.sample_rate, config.output_format)?,
    )?;
    let mut drain = Drain::new(config.samples_per_callback());
    let mut captured: Vec<Vec<f32>> = vec![Vec::new(); built.captures.len()];
    let mut freed = 0;

    for _ in 0..callbacks {
        if !output.mix_next_buffer() {
            warn!("output ring full; callback skipped");
        }
        drain.run(&mut output, &mut writer)?;
        for ((_, reader), samples) in built.captures.iter().zip(captured.iter_mut()) {
            reader.drain_into(samples);
        }
        freed += handle.collect_garbage();
    }
    writer.finalize()?;
    debug!("released {} objects from the render thread", freed);

    let mut written = vec![out_path.clone()];
    for ((name, _), samples) in built.captures.iter().zip(&captured) {
        let path = sidecar(&out_path, &format!("capture-{}", name));
        write_float_wav(&path, config.channels, config.sample_rate, samples)?;
        written.push(path);
    }
    for (name, id) in &built.recording {
        let audio = handle.stop_recording(*id)?;
        if audio.channels == 0 {
            continue;
        }
        let path = sidecar(&out_path, &format!("record-{}", name));
        write_float_wav(&path, audio.channels, audio.sample_rate, &audio.samples)?;
        written.push(path);
    }

    if !quiet {
        let rendered = (callbacks * config.frames_per_callback) as f64 / config.sample_rate as f64;
        println!(
            "rendered {} callbacks ({:.3} s), peak {:.1} dBFS",
            callbacks,
            rendered,
            20.0 * drain.peak.max(1e-9).log10()
        );
        for path in &written {
            println!("wrote {}", path.display());
        }
        print_analysis(&graph, &built, &handle)?;
    }
    Ok(0)
}

/// Moves staged samples from the output ring into the WAV writer.
struct Drain {
    floats: Vec<f32>,
    ints: Vec<i16>,
    peak: f32,
}

impl Drain {
    fn new(quantum: usize) -> Self {
        Self {
            floats: vec![0.0; quantum],
            ints: vec![0; quantum],
            peak: 0.0,
        }
    }

    fn run(&mut self, output: &mut OutputBuffer, writer: &mut WavWriter) -> Result<(), CliError> {
        match output.format() {
            SampleFormat::Float => loop {
                let count = output.pop_float(&mut self.floats);
                if count == 0 {
                    return Ok(());
                }
                for &sample in &self.floats[..count] {
                    self.peak = self.peak.max(sample.abs());
                    writer.write_sample(sample)?;
                }
            },
            SampleFormat::Int16 => loop {
                let count = output.pop_i16(&mut self.ints);
                if count == 0 {
                    return Ok(());
                }
                for &sample in &self.ints[..count] {
                    self.peak = self.peak.max((sample as f32 / 32767.0).abs());
                    writer.write_sample(sample)?;
                }
            },
        }
    }
}

fn wav_spec(
    channels: usize,
    sample_rate: u32,
    format: SampleFormat,
) -> Result<hound::WavSpec, CliError> {
    let channels = u16::try_from(channels)
        .map_err(|_| CliError::Usage(format!("{} channels cannot be written", channels)))?;
    let (bits_per_sample, sample_format) = match format {
        SampleFormat::Float => (32, hound::SampleFormat::Float),
        SampleFormat::Int16 => (16, hound::SampleFormat::Int),
    };
    Ok(hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format,
    })
}

fn write_float_wav(
    path: &Path,
    channels: usize,
    sample_rate: u32,
    samples: &[f32],
) -> Result<(), CliError> {
    let mut writer =
        hound::WavWriter::create(path, wav_spec(channels, sample_rate, SampleFormat::Float)?)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// `mix.wav` + `record-master` -> `mix.record-master.wav`.
fn sidecar(out: &Path, label: &str) -> PathBuf {
    let stem = out
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mixgraph".into());
    out.with_file_name(format!("{}.{}.wav", stem, label))
}

fn print_analysis(
    graph: &GraphConfig,
    built: &BuiltGraph,
    handle: &MixerHandle,
) -> Result<(), CliError> {
    for submix in &graph.submixes {
        let name = &submix.descriptor.name;
        let Some(&id) = built.submixes.get(name) else {
            continue;
        };
        if submix.envelope.is_some() {
            let values: Vec<String> = handle
                .envelope_values(id)?
                .iter()
                .map(|v| format!("{:.3}", v))
                .collect();
            println!("envelope {}: [{}]", name, values.join(", "));
        }
        if submix.spectrum.is_some() {
            if let Some(magnitudes) = handle.spectrum_magnitudes(id)? {
                let peak = magnitudes
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(bin, _)| bin)
                    .unwrap_or(0);
                let bins = magnitudes.len().saturating_sub(1).max(1);
                let hz = peak as f64 * handle.sample_rate() as f64 / (2 * bins) as f64;
                println!("spectrum {}: peak near {:.0} Hz", name, hz);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_names_sit_beside_the_output() {
        let path = sidecar(Path::new("/tmp/out/mix.wav"), "record-master");
        assert_eq!(path, PathBuf::from("/tmp/out/mix.record-master.wav"));
    }

    #[test]
    fn int16_spec_uses_sixteen_bits() {
        let spec = wav_spec(2, 48_000, SampleFormat::Int16).unwrap();
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    }
}
