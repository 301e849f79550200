//! Well-known per-user paths.
//!
//! The daemon channel lives at `~/.csd/csd.socket` on the local machine, and
//! SSH forwards it to the same path inside the remote environment.

use std::{
    io,
    path::{Path, PathBuf},
};

const STATE_DIR: &str = ".csd";
const SOCKET_FILE: &str = "csd.socket";
const LOG_FILE: &str = "csd.log";
const PID_FILE: &str = "csd.pid";
const CURRENT_FILE: &str = "current";
const CONFIG_DIR: &str = "csd";
const CONFIG_FILE: &str = "config.toml";

fn home_dir() -> io::Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "could not determine home directory")
    })
}

/// `~/.csd`
///
/// # Errors
/// Returns error if the home directory cannot be determined.
pub fn state_dir() -> io::Result<PathBuf> {
    Ok(home_dir()?.join(STATE_DIR))
}

/// `~/.csd/csd.socket`
///
/// # Errors
/// Returns error if the home directory cannot be determined.
pub fn socket_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join(SOCKET_FILE))
}

/// `~/.csd/csd.log`
///
/// # Errors
/// Returns error if the home directory cannot be determined.
pub fn log_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join(LOG_FILE))
}

/// `~/.csd/csd.pid`
///
/// # Errors
/// Returns error if the home directory cannot be determined.
pub fn pid_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join(PID_FILE))
}

/// `~/.csd/current`, the remembered session target.
///
/// # Errors
/// Returns error if the home directory cannot be determined.
pub fn current_target_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join(CURRENT_FILE))
}

/// `$XDG_CONFIG_HOME/csd/config.toml` (platform config dir elsewhere).
///
/// # Errors
/// Returns error if no config directory can be determined.
pub fn config_path() -> io::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "could not determine config directory")
    })?;
    Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Create the parent directory of `path` with owner-only permissions.
///
/// # Errors
/// Returns error if the directory cannot be created.
pub fn ensure_private_parent(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(parent)
}

/// Remove `path`, treating "already gone" as success.
///
/// # Errors
/// Returns any other I/O error.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
