//! Allow-list policy for remotely requested commands.
//!
//! The allow-list is the only gate between the forwarded socket and local
//! execution. It is fixed for the lifetime of the daemon.

use std::{fmt, path::Path};

/// Executables allowed when nothing else is configured.
pub const DEFAULT_ALLOWED: &[&str] = &["gh"];

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The command may run.
    Allowed,
    /// The command must not run.
    Denied { program: String, reason: String },
}

/// Fixed set of permitted executable basenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    /// Build an allow-list; blank and duplicate entries are dropped.
    #[must_use]
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for entry in entries.into_iter().map(Into::into) {
            let entry = entry.trim().to_string();
            if !entry.is_empty() && !list.contains(&entry) {
                list.push(entry);
            }
        }
        Self { entries: list }
    }

    /// Check `program` by its final path component, case-sensitively.
    #[must_use]
    pub fn check(&self, program: &str) -> PolicyDecision {
        let permitted =
            basename(program).is_some_and(|base| self.entries.iter().any(|e| e == base));
        if permitted {
            PolicyDecision::Allowed
        } else {
            PolicyDecision::Denied {
                program: program.to_string(),
                reason: format!("command {program:?} not allowed (allowed: {self})"),
            }
        }
    }

    /// Shorthand for `check(program) == Allowed`.
    #[must_use]
    pub fn permits(&self, program: &str) -> bool {
        matches!(self.check(program), PolicyDecision::Allowed)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED.iter().copied())
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries.join(", "))
    }
}

fn basename(program: &str) -> Option<&str> {
    Path::new(program).file_name().and_then(|name| name.to_str())
}
