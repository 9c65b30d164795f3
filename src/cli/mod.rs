//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for dbgshell.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug, Clone)]
#[command(name = "dbgshell")]
#[command(about = "Persistent debugger sessions for crash dump analysis")]
#[command(
    long_about = "Keeps one command-line debugger alive per crash dump and runs commands against it, returning exactly each command's output"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Dry-run mode: show configuration and the debugger command line without launching
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debugger executable; overrides the config file
    #[arg(long, global = true)]
    pub debugger: Option<String>,

    /// Per-command timeout in seconds; overrides the config file
    #[arg(long, global = true)]
    pub command_timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open a dump and start an interactive debugger shell
    Shell {
        /// Crash dump to load
        artifact: PathBuf,

        /// Print debugger output live as it arrives
        #[arg(long)]
        follow: bool,
    },

    /// Run a single command against a dump and exit
    Exec {
        /// Crash dump to load
        artifact: PathBuf,

        /// Debugger command, e.g. `!analyze -v`
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Dotted configuration key, e.g. session.command_timeout_secs
        key: String,
        /// Configuration value
        value: String,
    },

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self, config: &Config) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.log_level.clone())
        }
    }

    /// Apply command-line overrides on top of file and environment settings
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(debugger) = &self.debugger {
            config.debugger.path = debugger.clone();
        }
        if let Some(timeout) = self.command_timeout {
            config.session.command_timeout_secs = timeout;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }

    /// Check if we're running in dry-run mode
    pub fn is_dry_run_mode(&self) -> bool {
        self.dry_run
    }

    /// Artifact named by the subcommand, if any
    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.command {
            Commands::Shell { artifact, .. } | Commands::Exec { artifact, .. } => Some(artifact),
            Commands::Config { .. } => None,
        }
    }
}
