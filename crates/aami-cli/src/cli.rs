//! Command-line argument parsing with clap.

use std::path::PathBuf;

use aami_token::{DEFAULT_TTL_DAYS, DEFAULT_USAGE_LIMIT};
use clap::{Parser, Subcommand, ValueEnum};

/// AAMI alert rule lifecycle.
#[derive(Parser, Debug, Clone)]
#[command(name = "aami-rules")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Rule engine configuration file (TOML).
    #[arg(short, long, env = "AAMI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding the configuration file.
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Rule output directory, overriding the configuration file.
    #[arg(long, env = "PROMETHEUS_RULE_PATH")]
    pub rule_path: Option<PathBuf>,

    /// JSON state file holding definitions, groups, targets and tokens.
    #[arg(short, long, env = "AAMI_STATE", default_value = "aami-state.json")]
    pub state: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Regenerate rule files and reload the backend.
    Generate {
        /// Only regenerate this group.
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Delete a group's rule file and reload the backend.
    Delete {
        /// Group whose rules are removed.
        #[arg(short, long)]
        group: String,
    },

    /// Restore a group's rule file from its backup and reload the backend.
    Restore {
        /// Group to restore.
        #[arg(short, long)]
        group: String,
    },

    /// Ask the backend to reload its rule files.
    Reload,

    /// Check whether the backend is ready.
    Health,

    /// List the groups that have a rule file.
    List,

    /// Bootstrap token management.
    Token {
        /// Token subcommand to execute.
        #[command(subcommand)]
        command: TokenCommands,
    },
}

/// Token subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommands {
    /// Issue a new token. The secret is printed once.
    Issue {
        /// Token name.
        name: String,

        /// Number of registrations the token allows.
        #[arg(long, default_value_t = DEFAULT_USAGE_LIMIT)]
        uses: u32,

        /// Days until the token expires.
        #[arg(long, default_value_t = DEFAULT_TTL_DAYS)]
        ttl_days: i64,

        /// Labels copied onto registered targets (KEY=VALUE).
        #[arg(short, long = "label", value_name = "KEY=VALUE")]
        labels: Vec<String>,
    },

    /// List all tokens.
    List,

    /// Revoke a token.
    Revoke {
        /// Token ID.
        id: String,
    },
}
