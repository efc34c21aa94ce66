//! Clap derive structures for the `applisync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// applisync -- keep cloud-connected appliances in sync
#[derive(Debug, Parser)]
#[command(
    name = "applisync",
    version,
    about = "Observe and control cloud-connected home appliances",
    long_about = "Runs the appliance state coordinator against the vendor cloud API.\n\n\
        Merges live updates with periodic refreshes, resolves program-dependent\n\
        capabilities, and sends commands with optimistic feedback.",
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
    /// Account profile to use
    #[arg(long, short = 'p', env = "APPLISYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "APPLISYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write logs to this file, rotated daily
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator and print every state change until Ctrl-C
    Watch,

    /// Fetch every appliance once and print connectivity and last-seen
    #[command(alias = "ls")]
    Status,

    /// Show a property's effective value and constraints
    Resolve(PropertyArgs),

    /// Set a property on an appliance
    Set(SetArgs),

    /// Force a full refresh for an appliance (rate limited)
    Sync(SyncArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct PropertyArgs {
    /// Appliance id as listed by `status`
    pub appliance: String,

    /// Property path, e.g. `userSelections/antiCreaseValue`
    pub property: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: PropertyArgs,

    /// New value. Parsed as JSON when possible, otherwise sent as a string.
    pub value: String,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    pub appliance: String,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
