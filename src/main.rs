//! `lwd` binary entry point.

use std::process::ExitCode;

use clap::Parser as _;
use colored::Colorize as _;

use liveness_watchdog::cli_app::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    liveness_watchdog::logger::init(cli.verbose);
    match cli_app::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
