//! Text rendering of a graph description for `mixgraph describe`.

use std::fmt::Write;

use mixgraph_lib::config::{GraphConfig, SubmixConfig};
use mixgraph_lib::mixer::{EndpointKind, GeneratorConfig, SendStage};

pub fn describe(graph: &GraphConfig) -> String {
    let mut out = String::new();
    let mixer = &graph.mixer;
    let _ = writeln!(
        out,
        "mixer: {} Hz, {} channels, {} frames per callback, {:?} output",
        mixer.sample_rate, mixer.channels, mixer.frames_per_callback, mixer.output_format
    );

    let _ = writeln!(out, "submixes:");
    let master = graph.master_name();
    for root in graph.submixes.iter().filter(|s| s.parent.is_none()) {
        write_submix(&mut out, graph, root, master, 1);
    }

    let _ = writeln!(out, "sources:");
    for source in &graph.sources {
        let _ = writeln!(out, "  {} ({})", source.name, generator_label(&source.generator));
        for send in &source.sends {
            let stage = match send.stage {
                SendStage::PreEffect => "pre",
                SendStage::PostEffect => "post",
            };
            let _ = writeln!(out, "    -> {} {} {:.2}", send.submix, stage, send.level);
        }
    }
    out
}

fn write_submix(
    out: &mut String,
    graph: &GraphConfig,
    submix: &SubmixConfig,
    master: Option<&str>,
    depth: usize,
) {
    let name = submix.descriptor.name.as_str();
    let mut tags = Vec::new();
    if master == Some(name) {
        tags.push("master".to_string());
    }
    match submix.descriptor.endpoint {
        EndpointKind::None => {}
        EndpointKind::Default => tags.push("default endpoint".into()),
        EndpointKind::External => tags.push("external endpoint".into()),
    }
    if submix.soundfield {
        tags.push("soundfield".into());
    }
    if submix.descriptor.background_muted {
        tags.push("muted".into());
    }
    if !submix.descriptor.effects.is_empty() {
        tags.push(format!("{} effects", submix.descriptor.effects.len()));
    }
    if submix.record {
        tags.push("record".into());
    }
    if submix.envelope.is_some() {
        tags.push("envelope".into());
    }
    if submix.spectrum.is_some() {
        tags.push("spectrum".into());
    }

    let indent = "  ".repeat(depth);
    if tags.is_empty() {
        let _ = writeln!(out, "{}{}", indent, name);
    } else {
        let _ = writeln!(out, "{}{} [{}]", indent, name, tags.join(", "));
    }

    for child in graph
        .submixes
        .iter()
        .filter(|s| s.parent.as_deref() == Some(name))
    {
        write_submix(out, graph, child, master, depth + 1);
    }
}

fn generator_label(generator: &GeneratorConfig) -> String {
    match generator {
        GeneratorConfig::Sine { frequency_hz, .. } => format!("sine {} Hz", frequency_hz),
        GeneratorConfig::Noise { .. } => "noise".into(),
        GeneratorConfig::Samples {
            samples, channels, ..
        } => format!("{} frames x {} channels", samples.len() / (*channels).max(1), channels),
    }
}
