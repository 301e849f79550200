use std::{
    io::{self, Write},
    process::ExitCode,
};

use anyhow::{Context, Result};
use csd_transport::{ExecClient, exit_code_for};

use super::exit_code;

pub async fn run(command: Vec<String>) -> Result<ExitCode> {
    let client = ExecClient::with_default_socket()?;

    let response = match client.exec(command, None).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(exit_code(e.exit_code()));
        }
    };

    if let Some(message) = response.error_message() {
        eprintln!("{message}");
        return Ok(exit_code(exit_code_for(&response)));
    }

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(response.stdout.as_bytes())
        .and_then(|()| stdout.flush())
        .context("failed to write output")?;
    io::stderr()
        .lock()
        .write_all(response.stderr.as_bytes())
        .context("failed to write output")?;

    Ok(exit_code(exit_code_for(&response)))
}
