//! User-visible session labels.

use std::io::Write;

use csd_core::Target;

/// Default tab title template.
pub const DEFAULT_TITLE_FORMAT: &str = "CS: {repo}:{branch}";

const SUPPORTED_TERMINALS: &[&str] = &[
    "ghostty",
    "iTerm.app",
    "Apple_Terminal",
    "WezTerm",
    "Alacritty",
    "kitty",
];

/// Refreshed before every session attempt.
pub trait SessionDisplay: Send + Sync {
    fn refresh(&self, target: &Target);
}

/// Leaves the terminal alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDisplay;

impl SessionDisplay for NoDisplay {
    fn refresh(&self, _target: &Target) {}
}

impl<T: SessionDisplay> SessionDisplay for Option<T> {
    fn refresh(&self, target: &Target) {
        if let Some(display) = self {
            display.refresh(target);
        }
    }
}

/// Sets the terminal tab title (OSC 1).
#[derive(Debug, Clone)]
pub struct TabTitle {
    format: String,
}

impl TabTitle {
    #[must_use]
    pub fn new<S: Into<String>>(format: S) -> Self {
        Self { format: format.into() }
    }

    /// A tab title for the current terminal, or `None` if it does not
    /// understand OSC sequences.
    #[must_use]
    pub fn for_current_terminal<S: Into<String>>(format: S) -> Option<Self> {
        let term_program = std::env::var("TERM_PROGRAM").ok();
        let term = std::env::var("TERM").ok();
        is_supported_terminal(term_program.as_deref(), term.as_deref()).then(|| Self::new(format))
    }

    /// Title for `target`.
    #[must_use]
    pub fn title_for(&self, target: &Target) -> String {
        format_title(
            &self.format,
            target.repository.as_deref().unwrap_or_default(),
            target.branch.as_deref().unwrap_or_default(),
            &target.name,
        )
    }
}

impl Default for TabTitle {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE_FORMAT)
    }
}

impl SessionDisplay for TabTitle {
    fn refresh(&self, target: &Target) {
        let title = self.title_for(target);
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = write!(stdout, "\x1b]1;{title}\x07").and_then(|()| stdout.flush()) {
            tracing::debug!("Failed to set tab title: {e}");
        }
    }
}

/// Expand `{repo}`, `{short_repo}`, `{branch}` and `{name}` in `template`.
#[must_use]
pub fn format_title(template: &str, repo: &str, branch: &str, name: &str) -> String {
    let short_repo = repo.rsplit('/').next().unwrap_or(repo);
    template
        .replace("{repo}", repo)
        .replace("{short_repo}", short_repo)
        .replace("{branch}", branch)
        .replace("{name}", name)
}

/// Whether the terminal described by `TERM_PROGRAM`/`TERM` accepts OSC
/// title sequences.
#[must_use]
pub fn is_supported_terminal(term_program: Option<&str>, term: Option<&str>) -> bool {
    let term = term.unwrap_or_default();
    let known = SUPPORTED_TERMINALS
        .iter()
        .any(|t| term_program == Some(*t) || term.contains(&t.to_lowercase()));
    known || term.starts_with("xterm")
}
