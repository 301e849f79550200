//! Commands that open the interactive session and the port forwarder.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use csd_core::{CommandSpec, ForwardRule, OutputMode, ProcessHandle, Target};
use serde::Deserialize;

/// Remote end of the daemon channel forward; SSH expands `~` remotely.
pub const REMOTE_DAEMON_SOCKET: &str = "~/.csd/csd.socket";

/// Where rdm clients inside a session expect the clipboard service.
pub const REMOTE_RDM_ADDR: &str = "127.0.0.1:7391";

/// Builds the external commands for one session attempt.
pub trait SessionLauncher: Send + Sync {
    /// Foreground interactive session for `target`.
    fn session_command(&self, target: &Target) -> CommandSpec;

    /// Auxiliary forwarder for `rules`, or `None` when there is nothing to
    /// forward.
    fn forwarder_command(&self, target: &Target, rules: &[ForwardRule]) -> Option<CommandSpec>;
}

/// An SSH `-R` forward: remote listener to a local socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseForward {
    pub remote: String,
    pub local: PathBuf,
}

impl ReverseForward {
    /// Forward the daemon channel, if the local daemon socket exists.
    #[must_use]
    pub fn daemon_channel(local_socket: &Path) -> Option<Self> {
        local_socket.exists().then(|| Self {
            remote: REMOTE_DAEMON_SOCKET.to_string(),
            local: local_socket.to_path_buf(),
        })
    }

    /// Forward the rdm clipboard service to `local_socket`.
    #[must_use]
    pub fn rdm(local_socket: PathBuf) -> Self {
        Self {
            remote: REMOTE_RDM_ADDR.to_string(),
            local: local_socket,
        }
    }
}

impl fmt::Display for ReverseForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.local.display())
    }
}

/// Launcher for GitHub Codespaces via the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhCodespaceLauncher {
    program: String,
    reverse_forwards: Vec<ReverseForward>,
}

impl GhCodespaceLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
            reverse_forwards: Vec::new(),
        }
    }

    /// Use a different `gh` binary.
    #[must_use]
    pub fn program<S: Into<String>>(mut self, program: S) -> Self {
        self.program = program.into();
        self
    }

    /// Add an SSH reverse forward to every session.
    #[must_use]
    pub fn reverse_forward(mut self, forward: ReverseForward) -> Self {
        self.reverse_forwards.push(forward);
        self
    }

    /// Reverse forwards added so far.
    #[must_use]
    pub fn reverse_forwards(&self) -> &[ReverseForward] {
        &self.reverse_forwards
    }

    /// Look up repository and branch for codespace `name`.
    ///
    /// Any failure degrades to a name-only target.
    pub async fn lookup(&self, name: &str) -> Target {
        let spec = CommandSpec::new(&self.program).args([
            "cs",
            "list",
            "--json",
            "name,repository,gitStatus",
        ]);
        let output = match ProcessHandle::start(&spec, OutputMode::Captured) {
            Ok(handle) => handle.wait_with_output().await,
            Err(e) => Err(e),
        };

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!(
                    exit_code = output.exit_code(),
                    "gh cs list failed: {}",
                    output.stderr.trim()
                );
                return Target::named(name);
            }
            Err(e) => {
                tracing::warn!("Could not list codespaces: {e}");
                return Target::named(name);
            }
        };

        match parse_codespace_list(output.stdout.as_bytes(), name) {
            Ok(Some(target)) => target,
            Ok(None) => {
                tracing::warn!(name, "Codespace not found in gh cs list");
                Target::named(name)
            }
            Err(e) => {
                tracing::warn!("Could not parse gh cs list output: {e}");
                Target::named(name)
            }
        }
    }
}

impl Default for GhCodespaceLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLauncher for GhCodespaceLauncher {
    fn session_command(&self, target: &Target) -> CommandSpec {
        let mut spec =
            CommandSpec::new(&self.program).args(["cs", "ssh", "-c", target.name.as_str()]);
        if !self.reverse_forwards.is_empty() {
            spec = spec.arg("--");
            for forward in &self.reverse_forwards {
                spec = spec.arg("-R").arg(forward.to_string());
            }
        }
        spec
    }

    fn forwarder_command(&self, target: &Target, rules: &[ForwardRule]) -> Option<CommandSpec> {
        if rules.is_empty() {
            return None;
        }
        Some(
            CommandSpec::new(&self.program)
                .args(["cs", "ports", "forward"])
                .args(rules.iter().map(ToString::to_string))
                .args(["-c", target.name.as_str()]),
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedCodespace {
    name: String,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    git_status: Option<GitStatus>,
}

#[derive(Deserialize)]
struct GitStatus {
    #[serde(default)]
    r#ref: Option<String>,
}

/// Find `name` in `gh cs list --json name,repository,gitStatus` output.
///
/// # Errors
/// Returns error if the output is not the expected JSON array.
pub fn parse_codespace_list(json: &[u8], name: &str) -> Result<Option<Target>, serde_json::Error> {
    let listed: Vec<ListedCodespace> = serde_json::from_slice(json)?;
    Ok(listed.into_iter().find(|cs| cs.name == name).map(|cs| Target {
        name: cs.name,
        repository: cs.repository.filter(|r| !r.is_empty()),
        branch: cs.git_status.and_then(|s| s.r#ref).filter(|b| !b.is_empty()),
    }))
}

/// Path of the local rdm socket, as reported by `rdm socket`.
///
/// Returns `None` when rdm is not installed or its socket does not exist.
pub async fn discover_rdm_socket() -> Option<PathBuf> {
    let spec = CommandSpec::new("rdm").arg("socket");
    let output = ProcessHandle::start(&spec, OutputMode::Captured)
        .ok()?
        .wait_with_output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let path = PathBuf::from(output.stdout.trim());
    if path.as_os_str().is_empty() || !path.exists() {
        tracing::debug!(path = %path.display(), "rdm socket not found");
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn target() -> Target {
        Target::named("cs-abc")
    }

    #[test]
    fn test_session_command_without_forwards() {
        let spec = GhCodespaceLauncher::new().session_command(&target());
        assert_eq!(spec.display(), "gh cs ssh -c cs-abc");
    }

    #[test]
    fn test_session_command_with_forwards() {
        let launcher = GhCodespaceLauncher::new()
            .reverse_forward(ReverseForward::rdm(PathBuf::from("/tmp/rdm.sock")))
            .reverse_forward(ReverseForward {
                remote: REMOTE_DAEMON_SOCKET.to_string(),
                local: PathBuf::from("/home/me/.csd/csd.socket"),
            });
        let spec = launcher.session_command(&target());
        assert_eq!(
            spec.args,
            [
                "cs",
                "ssh",
                "-c",
                "cs-abc",
                "--",
                "-R",
                "127.0.0.1:7391:/tmp/rdm.sock",
                "-R",
                "~/.csd/csd.socket:/home/me/.csd/csd.socket",
            ]
        );
    }

    #[test]
    fn test_daemon_channel_requires_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("csd.socket");
        assert!(ReverseForward::daemon_channel(&socket).is_none());

        std::fs::write(&socket, "").unwrap();
        let forward = ReverseForward::daemon_channel(&socket).unwrap();
        assert_eq!(forward.remote, REMOTE_DAEMON_SOCKET);
    }

    #[test]
    fn test_forwarder_command() {
        let launcher = GhCodespaceLauncher::new();
        assert!(launcher.forwarder_command(&target(), &[]).is_none());

        let rules = [ForwardRule::same(80), ForwardRule { local: 8080, remote: 3000 }];
        let spec = launcher.forwarder_command(&target(), &rules).unwrap();
        assert_eq!(spec.display(), "gh cs ports forward 80:80 8080:3000 -c cs-abc");
    }

    #[test]
    fn test_parse_codespace_list() {
        let json = br#"[
            {"name":"other","repository":"a/b","gitStatus":{"ref":"dev"}},
            {"name":"cs-abc","repository":"github/github",
             "gitStatus":{"ref":"main","hasUncommittedChanges":false}}
        ]"#;
        let found = parse_codespace_list(json, "cs-abc").unwrap().unwrap();
        assert_eq!(found.repository.as_deref(), Some("github/github"));
        assert_eq!(found.branch.as_deref(), Some("main"));

        assert_eq!(parse_codespace_list(json, "missing").unwrap(), None);
        assert!(parse_codespace_list(b"oops", "cs-abc").is_err());
    }

    #[tokio::test]
    async fn test_lookup_degrades_to_name() {
        let launcher = GhCodespaceLauncher::new().program("csd-test-no-such-gh");
        assert_eq!(launcher.lookup("cs-abc").await, Target::named("cs-abc"));
    }
}
