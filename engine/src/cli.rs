//! CLI interface for Warden
//!
//! Commands and global flags, defined with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warden: read-only codebase and log analysis agent
///
/// Plans a request, runs read-only analysis capabilities against a local
/// repository, and checks every response for destructive instructions before
/// delivering it.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single request and print the response
    Ask {
        /// The request, e.g. "analyze this repository and show dependencies"
        input: String,

        /// Local repository to analyze (defaults to core.workspace)
        #[arg(long, value_name = "PATH")]
        repo: Option<String>,
    },

    /// Interactive conversation with session memory
    Chat {
        /// Local repository to analyze (defaults to core.workspace)
        #[arg(long, value_name = "PATH")]
        repo: Option<String>,
    },

    /// Inspect or edit long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Manage reasoning-service API keys in the OS keychain
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// List registered analysis capabilities
    Capabilities,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Show stored preferences and analyzed repositories
    Show,

    /// Forget everything in long-term memory
    Clear,

    /// Store a preference
    Set {
        key: String,
        value: String,
    },

    /// Store the preferred target framework for a migration source
    Migration {
        source: String,
        target: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Store API keys (comma- or semicolon-separated)
    Set {
        keys: String,
    },

    /// Show whether keys are available and where they come from
    Status,

    /// Delete stored API keys
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Validate the configuration file
    Validate,
}
