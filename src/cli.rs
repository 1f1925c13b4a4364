//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sdrpick")]
#[command(author, version, about = "Deadlock Server Picker - block game relays you don't want to play on")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding config.json, presets.json and latency history
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Print firewall commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Run firewall commands directly instead of through sudo
    #[arg(long, global = true)]
    pub no_sudo: bool,

    /// Use clustered server groups (e.g. "China Mainland")
    #[arg(short = 'c', long, global = true)]
    pub clustered: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List servers with their block status
    List {
        /// Measure latency to every server
        #[arg(short, long)]
        ping: bool,

        /// Only show blocked servers
        #[arg(short, long)]
        blocked: bool,
    },

    /// Block servers by name or code
    Block {
        #[arg(required = true)]
        servers: Vec<String>,
    },

    /// Unblock servers by name or code
    Unblock {
        servers: Vec<String>,

        /// Unblock every server
        #[arg(short, long)]
        all: bool,
    },

    /// Block every server
    BlockAll,

    /// Block every server except the given ones
    BlockExcept {
        #[arg(required = true)]
        servers: Vec<String>,
    },

    /// Measure latency to servers (all if none given)
    Ping { servers: Vec<String> },

    /// Manage saved server presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },

    /// Show firewall access, blocked servers and preset count
    Status,

    /// Remove every rule this tool created
    Reset,

    /// Apply always_block, never_block and default_region from the config
    Apply,

    /// List region presets
    Regions,

    /// List servers in a region
    ListRegion {
        region: String,

        /// Measure latency to the region's servers
        #[arg(short, long)]
        ping: bool,
    },

    /// Allow only a region, blocking everything else
    AllowRegion {
        /// Region alias or name (defaults to the configured default_region)
        region: Option<String>,
    },

    /// Block every server in a region
    BlockRegion { region: String },

    /// Unblock every server in a region
    UnblockRegion { region: String },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show how to persist rules across reboots
    SaveRules,

    /// Inspect recorded latency measurements
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show version
    Version,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum PresetAction {
    /// List saved presets for the current mode
    List,
    /// Save servers under a name
    Create {
        name: String,
        #[arg(required = true)]
        servers: Vec<String>,
    },
    /// Delete a preset
    Delete { name: String },
    /// Unblock the servers of a preset
    Apply {
        name: String,
        /// Also block every server outside the preset
        #[arg(long)]
        block_others: bool,
    },
    /// Write all presets to a JSON file
    Export { path: PathBuf },
    /// Read presets from a JSON file
    Import {
        path: PathBuf,
        /// Replace presets that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete every preset
    Clear,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print every setting
    Show,
    /// Change a setting
    Set { key: String, value: String },
    /// Restore defaults
    Reset,
    /// Print the config file location
    Path,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum HistoryAction {
    /// Summaries for one server code or all of them
    Show { code: Option<String> },
    /// Servers with the lowest average latency
    Best {
        #[arg(default_value = "5")]
        count: usize,
    },
    /// Forget recorded measurements
    Clear { code: Option<String> },
}
