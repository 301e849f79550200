use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "csd")]
#[command(version)]
#[command(
    about = "Resilient codespace SSH sessions and local command execution",
    long_about = None
)]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the local execution daemon
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// Run a command on your local machine from inside a codespace
    ///
    /// Requires `csd server start` on the local machine and a session opened
    /// with `csd ssh`. Only allow-listed commands (by default `gh`) run.
    Local {
        /// Command and arguments, passed through verbatim
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// SSH into a codespace with socket forwarding and optional reconnect
    Ssh(SshArgs),

    /// Remember a codespace as the default target
    Select {
        /// Codespace name
        #[arg(required_unless_present = "clear")]
        name: Option<String>,

        /// Forget the remembered codespace
        #[arg(long, conflicts_with = "name")]
        clear: bool,
    },

    /// Print the remembered codespace
    Current,

    /// Print the effective configuration, or create/edit the config file
    Config {
        /// Open the config file in $EDITOR, creating it first if needed
        #[arg(short, long, conflicts_with = "init")]
        edit: bool,

        /// Write the default config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    /// Run the daemon in the foreground
    Start,
    /// Stop a running daemon
    Stop,
    /// Check whether the daemon answers
    Status,
    /// Print the socket path
    Socket,
}

#[derive(Args, Debug, Default)]
pub struct SshArgs {
    /// Codespace name (defaults to the remembered one)
    pub name: Option<String>,

    /// Codespace name; overrides the positional name
    #[arg(short = 'c', long = "codespace")]
    pub codespace: Option<String>,

    /// Reconnect automatically after a disconnect
    #[arg(long, conflicts_with = "no_retry")]
    pub retry: bool,

    /// Never reconnect, even if the repo config enables it
    #[arg(long)]
    pub no_retry: bool,

    /// Seconds to wait before reconnecting
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Reconnection attempts after the first (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Disable rdm clipboard forwarding
    #[arg(long)]
    pub no_rdm: bool,
}

impl SshArgs {
    /// Target named on the command line, `-c` first.
    pub fn explicit_target(&self) -> Option<&str> {
        self.codespace.as_deref().or(self.name.as_deref())
    }

    /// `Some` only when a retry flag was given.
    pub const fn retry_flag(&self) -> Option<bool> {
        if self.retry {
            Some(true)
        } else if self.no_retry {
            Some(false)
        } else {
            None
        }
    }
}
