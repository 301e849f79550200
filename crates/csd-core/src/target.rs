//! Session target identity and forwarding rules.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target resolution error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("no codespace specified and none selected (use 'csd select' or provide a name)")]
    NoTarget,
    #[error("Invalid forwarding rule: {0}")]
    InvalidRule(String),
}

/// The remote environment a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name used to address the remote environment.
    pub name: String,
    /// Repository the environment was created from (`owner/name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Checked-out branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Target {
    /// Create a target known only by name.
    #[must_use]
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            repository: None,
            branch: None,
        }
    }

    /// Human-readable description, e.g. `name (owner/repo @ main)`.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.repository, &self.branch) {
            (Some(repo), Some(branch)) => format!("{} ({repo} @ {branch})", self.name),
            (Some(repo), None) => format!("{} ({repo})", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Pick the session target: an explicit name wins over the remembered one.
///
/// The remembered value is passed in by the caller; persistence is not this
/// function's concern. Blank names count as absent.
///
/// # Errors
/// Returns [`TargetError::NoTarget`] if neither is available.
pub fn resolve_target(
    explicit: Option<&str>,
    remembered: Option<&str>,
) -> Result<String, TargetError> {
    explicit
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| remembered.map(str::trim).filter(|name| !name.is_empty()))
        .map(ToOwned::to_owned)
        .ok_or(TargetError::NoTarget)
}

/// A forwarded endpoint pair: local port to remote port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardRule {
    pub local: u16,
    pub remote: u16,
}

impl ForwardRule {
    /// Forward the same port number on both ends.
    #[must_use]
    pub const fn same(port: u16) -> Self {
        Self {
            local: port,
            remote: port,
        }
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

impl FromStr for ForwardRule {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TargetError::InvalidRule(s.to_string());
        match s.split_once(':') {
            Some((local, remote)) => Ok(Self {
                local: local.trim().parse().map_err(|_| invalid())?,
                remote: remote.trim().parse().map_err(|_| invalid())?,
            }),
            None => s.trim().parse().map(Self::same).map_err(|_| invalid()),
        }
    }
}
