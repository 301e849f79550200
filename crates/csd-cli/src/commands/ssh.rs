use std::process::ExitCode;

use anyhow::Result;
use csd_core::{paths, resolve_target, shutdown_token};
use csd_session::{
    FileTargetStore, GhCodespaceLauncher, ReverseForward, SessionEnd, SessionError, SessionManager,
    TabTitle, TargetStore, launcher::discover_rdm_socket,
};

use super::exit_code;
use crate::{cli::SshArgs, config::Config};

pub async fn run(args: &SshArgs, config: &Config) -> Result<ExitCode> {
    // Must exist before the session child starts.
    let cancel = shutdown_token();

    let store = FileTargetStore::default_location()?;
    let name = target_name(&store, args.explicit_target()).await?;

    let mut launcher = GhCodespaceLauncher::new();
    let target = launcher.lookup(&name).await;
    if let Err(e) = store.set(&target.name).await {
        tracing::warn!("Failed to update current codespace: {e}");
    }
    println!("Connecting to {}...", target.describe());

    if !args.no_rdm {
        if let Some(socket) = discover_rdm_socket().await {
            launcher = launcher.reverse_forward(ReverseForward::rdm(socket));
        }
    }
    if let Some(forward) = ReverseForward::daemon_channel(&paths::socket_path()?) {
        launcher = launcher.reverse_forward(forward);
    }

    let repo = target.repository.as_deref();
    let display = if config.terminal.set_tab_title {
        TabTitle::for_current_terminal(config.terminal.title_format.as_str())
    } else {
        None
    };
    let manager = SessionManager::new(launcher, display)
        .retry(config.retry_policy(repo, args.retry_flag(), args.retry_delay, args.max_retries))
        .forward_rules(config.forward_rules(repo))
        .forwarder_grace(config.forwarder_grace());

    match manager.run(&target, &cancel).await {
        Ok(report) => {
            match report.end {
                SessionEnd::Clean => println!("SSH session ended normally."),
                SessionEnd::UserCancelled => println!("\nDisconnected."),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(SessionError::AttemptFailed { exit_code: code, .. }) => Ok(exit_code(code)),
        Err(e) => Err(e.into()),
    }
}

/// Codespace to connect to: `explicit` first, then the remembered one.
///
/// An unreadable store counts as nothing remembered.
async fn target_name<S: TargetStore>(store: &S, explicit: Option<&str>) -> Result<String> {
    let remembered = store.get().await.unwrap_or_else(|e| {
        tracing::warn!("Failed to read current codespace: {e}");
        None
    });
    Ok(resolve_target(explicit, remembered.as_deref())?)
}
