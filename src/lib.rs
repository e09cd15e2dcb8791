#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod commands;
pub mod domain;
pub mod infrastructure;
pub mod ports;

use std::process::ExitCode;

use clap::Parser;

use commands::Cli;

/// Parse the command line and run the installer.
pub fn run() -> ExitCode {
    commands::execute(Cli::parse())
}
