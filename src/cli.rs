use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetops")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Bulk guest operations and remote script execution for Proxmox VE clusters", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/fleetops/config.toml)
    #[arg(long, global = true, env = "FLEETOPS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply an action to every VM or container in an ID range
    Bulk(BulkArgs),

    /// List the IDs in a range that exist and match a state
    Filter(FilterArgs),

    /// Run a script on cluster nodes over SSH
    Exec(ExecArgs),

    /// Inspect saved bulk-run snapshots
    #[command(subcommand)]
    State(StateCommand),

    /// List configured nodes
    Nodes,

    /// Show configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared argument types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GuestKindArg {
    /// QEMU virtual machines (qm)
    Vm,
    /// LXC containers (pct)
    Ct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormatArg {
    Json,
    Csv,
}

// ============================================================================
// Bulk
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkActionArg {
    Start,
    Stop,
    Shutdown,
    Reboot,
    /// Change configuration options (requires --option)
    Set,
}

#[derive(Parser)]
pub struct BulkArgs {
    /// Action to apply
    #[arg(value_enum)]
    pub action: BulkActionArg,

    /// Guest type
    #[arg(short, long, value_enum)]
    pub kind: GuestKindArg,

    /// First ID of the range
    pub start: u32,

    /// Last ID of the range (inclusive)
    pub end: u32,

    /// Configuration option for `set`, as KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Run on a worker pool sized by the `jobs` config key
    #[arg(short, long, conflicts_with = "retries")]
    pub parallel: bool,

    /// Number of parallel workers (implies --parallel)
    #[arg(short, long, conflicts_with = "retries")]
    pub jobs: Option<usize>,

    /// Retry failed IDs this many times
    #[arg(short, long, default_value = "0")]
    pub retries: u32,

    /// Skip guests that are stopped
    #[arg(long, conflicts_with = "skip_running")]
    pub skip_stopped: bool,

    /// Skip guests that are running
    #[arg(long)]
    pub skip_running: bool,

    /// Print failed and skipped IDs after the summary
    #[arg(long)]
    pub report: bool,

    /// Export the results
    #[arg(short, long, value_enum)]
    pub export: Option<ExportFormatArg>,

    /// Export destination (default: derived from the run)
    #[arg(long, requires = "export", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Save counters and ID sets for later inspection
    #[arg(long, value_name = "FILE")]
    pub save_state: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    Running,
    Stopped,
    Any,
}

#[derive(Parser)]
pub struct FilterArgs {
    /// Guest type
    #[arg(short, long, value_enum)]
    pub kind: GuestKindArg,

    /// First ID of the range
    pub start: u32,

    /// Last ID of the range (inclusive)
    pub end: u32,

    /// Only IDs in this state
    #[arg(short, long, value_enum, default_value = "any")]
    pub state: StateArg,
}

// ============================================================================
// Exec
// ============================================================================

#[derive(Parser)]
pub struct ExecArgs {
    /// Nodes to run on (comma-separated names from the config)
    #[arg(
        short,
        long,
        value_delimiter = ',',
        required_unless_present = "all",
        conflicts_with = "all"
    )]
    pub nodes: Vec<String>,

    /// Run on every configured node
    #[arg(short, long)]
    pub all: bool,

    /// Script to run
    pub script: PathBuf,

    /// Extra support file or directory to ship with the script (repeatable)
    #[arg(short = 'f', long = "support", value_name = "PATH")]
    pub support: Vec<PathBuf>,

    /// Print failed and skipped nodes after the summary
    #[arg(long)]
    pub report: bool,

    /// Export the results
    #[arg(short, long, value_enum)]
    pub export: Option<ExportFormatArg>,

    /// Export destination (default: derived from the run)
    #[arg(long, requires = "export", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Arguments passed to the script
    #[arg(last = true)]
    pub args: Vec<String>,
}

// ============================================================================
// State / Config
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// Print a saved bulk-run snapshot
    Show {
        /// Snapshot file written by `bulk --save-state`
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}
