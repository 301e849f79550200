use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use csd_session::{FileTargetStore, GhCodespaceLauncher, TargetStore};

pub async fn select(name: Option<&str>, clear: bool) -> Result<ExitCode> {
    let store = FileTargetStore::default_location()?;

    if clear {
        store.clear().await.context("failed to clear selection")?;
        println!("Cleared current codespace");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        bail!("codespace name required");
    };
    let target = GhCodespaceLauncher::new().lookup(name).await;
    store.set(&target.name).await.context("failed to save selection")?;

    println!("Selected codespace: {}", target.describe());
    Ok(ExitCode::SUCCESS)
}

pub async fn current() -> Result<ExitCode> {
    let store = FileTargetStore::default_location()?;
    match store.get().await? {
        Some(name) => {
            println!("{name}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No codespace selected");
            Ok(ExitCode::FAILURE)
        }
    }
}
