//! # mixgraph
//!
//! Offline renderer for submix graph descriptions.

use log::error;

mod cli;
mod error;
mod logging;
mod runner;

fn main() {
    let log_buffer = logging::init();
    let args = cli::args::build_cli().get_matches();

    let code = match runner::run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {}", err);
            1
        }
    };

    if args.get_flag("print-log") {
        for line in logging::snapshot(&log_buffer) {
            eprintln!("{}", line);
        }
    }

    std::process::exit(code)
}
