//! CLI argument definitions for `mixgraph`.

use clap::{value_parser, Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("mixgraph")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Render submix graphs offline")
        .arg_required_else_help(true)
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Suppress the summary printed to stdout"),
        )
        .arg(
            Arg::new("print-log")
                .long("print-log")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Dump the captured log to stderr before exiting"),
        )
        .subcommand(
            Command::new("render")
                .about("Render a graph description to a WAV file")
                .arg(
                    Arg::new("GRAPH")
                        .help("Path to a JSON graph description")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .short('s')
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .default_value("1.0")
                        .help("Length of audio to render"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_name("PATH")
                        .default_value("mixgraph.wav")
                        .help("Main output WAV file; captures and recordings land beside it"),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .short('f')
                        .value_name("FORMAT")
                        .value_parser(["float", "int16"])
                        .help("Override the graph's output sample format"),
                )
                .arg(
                    Arg::new("debug-tone")
                        .long("debug-tone")
                        .action(ArgAction::SetTrue)
                        .help("Add the 440 Hz debug tone to channel 0"),
                )
                .arg(
                    Arg::new("bypass-effects")
                        .long("bypass-effects")
                        .action(ArgAction::SetTrue)
                        .help("Skip every submix effect chain"),
                ),
        )
        .subcommand(
            Command::new("describe")
                .about("Validate a graph description and print its tree")
                .arg(
                    Arg::new("GRAPH")
                        .help("Path to a JSON graph description")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("create")
                .about("Emit default JSON payloads")
                .subcommand_required(true)
                .subcommand(
                    Command::new("example-graph").about("Print an example graph description"),
                )
                .subcommand(
                    Command::new("mixer-config").about("Print the default mixer configuration"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn render_defaults() {
        let matches = build_cli()
            .try_get_matches_from(["mixgraph", "render", "graph.json"])
            .unwrap();
        let (_, render) = matches.subcommand().unwrap();
        assert_eq!(render.get_one::<f64>("seconds"), Some(&1.0));
        assert_eq!(
            render.get_one::<String>("out").map(String::as_str),
            Some("mixgraph.wav")
        );
        assert!(render.get_one::<String>("format").is_none());
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(build_cli()
            .try_get_matches_from(["mixgraph", "render", "g.json", "--format", "int24"])
            .is_err());
    }
}
