//! Command implementations.

mod config;
mod local;
mod select;
mod server;
mod ssh;

use std::process::ExitCode;

use anyhow::Result;

use crate::{
    cli::{Cli, Command, ServerCommand},
    config::Config,
};

/// Run the parsed command.
///
/// # Errors
/// Returns error for anything the user should see as `Error: ...`.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Server { command } => {
            let config = load_config();
            match command {
                ServerCommand::Start => server::start(&config).await,
                ServerCommand::Stop => server::stop().await,
                ServerCommand::Status => server::status().await,
                ServerCommand::Socket => server::socket(),
            }
        }
        Command::Local { command } => local::run(command).await,
        Command::Ssh(args) => ssh::run(&args, &load_config()).await,
        Command::Select { name, clear } => select::select(name.as_deref(), clear).await,
        Command::Current => select::current().await,
        Command::Config { edit, init } => config::run(edit, init).await,
    }
}

/// Config with a warning, not an error, when the file is unusable.
fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config: {e:#}");
        Config::default()
    })
}

/// Map an exit code onto the 0-255 range the OS reports.
pub fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code & 0xff).unwrap_or(1))
}
