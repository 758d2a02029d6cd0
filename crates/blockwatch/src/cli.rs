//! Clap derive structures for the `blockwatch` CLI.
//!
//! Defines the command tree, global flags and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// blockwatch -- Minecraft server status in Discord channel names
#[derive(Debug, Parser)]
#[command(
    name = "blockwatch",
    version,
    about = "Mirror Minecraft server status into Discord voice channels",
    long_about = "A Discord bot that polls Minecraft servers over the query protocol\n\
        and keeps per-guild voice channels named after the server address,\n\
        the player count and the total player hours.\n\n\
        Guild admins configure it in chat with `$setup <address>`.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "BLOCKWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database (overrides [storage] database)
    #[arg(long, env = "BLOCKWATCH_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', env = "BLOCKWATCH_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to Discord and monitor every configured server
    Run(RunArgs),

    /// Query a Minecraft server once and print what it reports
    #[command(alias = "q")]
    Query(QueryArgs),

    /// Inspect and remove stored tenants (guilds)
    #[command(alias = "t")]
    Tenants(TenantsArgs),

    /// Manage blockwatch configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Keep tenants in memory only; nothing survives a restart
    #[arg(long)]
    pub ephemeral: bool,

    /// Command prefix (overrides [discord] command_prefix)
    #[arg(long)]
    pub prefix: Option<String>,
}

// ── Query ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Server address, optionally with `:port`
    pub address: String,

    /// Query port, when not given in the address
    #[arg(long, short = 'p')]
    pub port: Option<String>,

    /// Query timeout in milliseconds (overrides [monitor] query_timeout_ms)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

// ── Tenants ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TenantsArgs {
    #[command(subcommand)]
    pub command: TenantsCommand,
}

#[derive(Debug, Subcommand)]
pub enum TenantsCommand {
    /// List stored tenants
    #[command(alias = "ls")]
    List,

    /// Show one tenant with its derived state
    Show {
        /// Guild id
        id: String,
    },

    /// Remove a tenant and delete its display channels
    #[command(alias = "rm")]
    Remove {
        /// Guild id
        id: String,

        /// Only delete stored state; leave Discord channels alone
        #[arg(long)]
        local_only: bool,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create the config file with guided setup
    Init,

    /// Display the resolved configuration (token redacted)
    Show,

    /// Print the config file location
    Path,

    /// Store the bot token in the system keyring
    SetToken,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
