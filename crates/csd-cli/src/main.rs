//! `csd`: resilient codespace SSH sessions and local command execution.

mod cli;
mod commands;
mod config;
mod logging;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Command, ServerCommand};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = match cli.command {
        Command::Server {
            command: ServerCommand::Start,
        } => csd_core::paths::log_path().ok(),
        _ => None,
    };
    if let Err(e) = logging::init(cli.verbose, log_file.as_deref()) {
        eprintln!("Warning: {e:#}");
    }

    match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
