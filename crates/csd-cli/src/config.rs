//! User configuration (`$XDG_CONFIG_HOME/csd/config.toml`).
//!
//! Every field has a default, so a missing file or section is fine.

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use csd_core::{ForwardRule, paths};
use csd_executor::{AllowList, DaemonConfig};
use csd_session::{RetryPolicy, display::DEFAULT_TITLE_FORMAT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub terminal: TerminalConfig,
    /// Per-repository settings keyed by `owner/name`.
    pub repos: BTreeMap<String, RepoConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub retry_delay_secs: u64,
    /// Retries after the first attempt; 0 is unlimited.
    pub max_retries: u32,
    pub forwarder_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 3,
            max_retries: 0,
            forwarder_grace_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub allowed_commands: Vec<String>,
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_commands: vec!["gh".to_string()],
            drain_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub set_tab_title: bool,
    pub title_format: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            set_tab_title: true,
            title_format: DEFAULT_TITLE_FORMAT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Ports forwarded during `csd ssh`: `80` or `"8080:3000"`.
    pub ports: Vec<PortEntry>,
    /// Default for `csd ssh --retry`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_retry: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Port(u16),
    Rule(String),
}

impl PortEntry {
    fn to_rule(&self) -> Result<ForwardRule> {
        match self {
            Self::Port(port) => Ok(ForwardRule::same(*port)),
            Self::Rule(rule) => Ok(rule.parse()?),
        }
    }
}

impl Config {
    /// Load from the default location.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path()?)
    }

    /// Load from `path`; a missing file yields defaults.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config to `path`, refusing to overwrite.
    ///
    /// # Errors
    /// Returns error if `path` exists or cannot be written.
    pub fn init_at(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = Self::default().to_toml()?;
        fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Effective settings as TOML.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    fn validate(&self) -> Result<()> {
        for (repo, repo_config) in &self.repos {
            for port in &repo_config.ports {
                port.to_rule().with_context(|| format!("repos.\"{repo}\".ports"))?;
            }
        }
        Ok(())
    }

    /// Full repository name for `name`, which may be an alias.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.repos
            .iter()
            .find(|(_, repo)| repo.alias.as_deref() == Some(name))
            .map_or(name, |(full, _)| full.as_str())
    }

    /// Settings for `repo` (full name or alias).
    pub fn repo_config(&self, repo: &str) -> Option<&RepoConfig> {
        self.repos.get(self.resolve_alias(repo))
    }

    /// Forwarding rules for `repo`.
    pub fn forward_rules(&self, repo: Option<&str>) -> Vec<ForwardRule> {
        repo.and_then(|r| self.repo_config(r))
            .map(|c| c.ports.iter().filter_map(|p| p.to_rule().ok()).collect())
            .unwrap_or_default()
    }

    /// Retry policy for `repo`; explicit flags win over config.
    pub fn retry_policy(
        &self,
        repo: Option<&str>,
        retry_flag: Option<bool>,
        delay_flag: Option<u64>,
        max_retries_flag: Option<u32>,
    ) -> RetryPolicy {
        let enabled = retry_flag
            .or_else(|| repo.and_then(|r| self.repo_config(r)).and_then(|c| c.ssh_retry))
            .unwrap_or(false);
        RetryPolicy {
            enabled,
            delay: Duration::from_secs(delay_flag.unwrap_or(self.session.retry_delay_secs)),
            max_retries: None,
        }
        .max_retries(max_retries_flag.unwrap_or(self.session.max_retries))
    }

    pub const fn forwarder_grace(&self) -> Duration {
        Duration::from_secs(self.session.forwarder_grace_secs)
    }

    /// Daemon settings; read once at start.
    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            allow_list: AllowList::new(self.server.allowed_commands.iter().cloned()),
            drain_timeout: Duration::from_secs(self.server.drain_timeout_secs),
        }
    }
}
