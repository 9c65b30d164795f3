//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::debugger::PromptMatcher;

pub const DEFAULT_CONFIG_FILE: &str = "dbgshell.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// How the external debugger is launched and spoken to
    pub debugger: DebuggerConfig,

    /// Session timing and limits
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Path to the log file; empty disables file logging
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Debugger executable
    pub path: String,

    /// Symbol search path; omitted from the command line when unset
    pub symbol_path: Option<String>,

    pub symbol_path_flag: String,

    /// Ask for source line information
    pub line_numbers: bool,

    pub line_numbers_flag: String,

    /// Flag preceding the artifact path
    pub artifact_flag: String,

    /// Arguments placed before all generated ones
    pub extra_args: Vec<String>,

    /// Command that asks the debugger to quit
    pub exit_command: String,

    /// Joins a command and the marker echo on one input line
    pub command_separator: String,

    /// Echo syntax; `{marker}` is replaced with the completion marker
    pub echo_template: String,

    /// Regular expressions recognizing the interactive prompt
    pub prompt_patterns: Vec<String>,

    /// Accepted artifact extensions; empty accepts any file
    pub artifact_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default per-command timeout in seconds
    pub command_timeout_secs: u64,

    /// How long to wait for the first prompt after launch
    pub ready_timeout_secs: u64,

    /// Quiet period after which a `>` counts as a prompt
    pub quiet_interval_ms: u64,

    pub poll_interval_ms: u64,

    /// Idle time before an unterminated output chunk is delivered
    pub partial_flush_ms: u64,

    /// Time the debugger gets to honour the exit command
    pub grace_timeout_ms: u64,

    /// Time between the stop signal and the unconditional kill
    pub kill_wait_ms: u64,

    /// Relaunch a crashed debugger on the next command
    pub auto_restart: bool,

    /// Upper bound on time spent relaunching
    pub restart_window_secs: u64,

    /// Executed commands kept per session
    pub history_size: usize,

    pub max_command_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log: LogConfig::default(),
            debugger: DebuggerConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/dbgshell.log".to_string(),
        }
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        let path = if cfg!(windows) { "cdb.exe" } else { "cdb" };
        Self {
            path: path.to_string(),
            symbol_path: Some(
                "SRV*C:\\Symbols*https://msdl.microsoft.com/download/symbols".to_string(),
            ),
            symbol_path_flag: "-y".to_string(),
            line_numbers: true,
            line_numbers_flag: "-lines".to_string(),
            artifact_flag: "-z".to_string(),
            extra_args: Vec::new(),
            exit_command: "q".to_string(),
            command_separator: ";".to_string(),
            echo_template: ".echo {marker}".to_string(),
            prompt_patterns: vec![PromptMatcher::DEFAULT_PATTERN.to_string()],
            artifact_extensions: vec!["dmp".to_string()],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 120,
            ready_timeout_secs: 60,
            quiet_interval_ms: 5000,
            poll_interval_ms: 100,
            partial_flush_ms: 50,
            grace_timeout_ms: 3000,
            kill_wait_ms: 1000,
            auto_restart: false,
            restart_window_secs: 30,
            history_size: 100,
            max_command_length: 1000,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {}", name, raw);
            None
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // DBGSHELL_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("DBGSHELL_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // DBGSHELL_LOG_FILE_PATH - logging destination file, empty disables
        if let Ok(file_path) = env::var("DBGSHELL_LOG_FILE_PATH") {
            self.log.file_path = file_path.trim().to_string();
        }

        // DBGSHELL_DEBUGGER_PATH - debugger executable
        if let Ok(path) = env::var("DBGSHELL_DEBUGGER_PATH") {
            if !path.trim().is_empty() {
                self.debugger.path = path;
            }
        }

        // DBGSHELL_SYMBOL_PATH - symbol search path, empty clears it
        if let Ok(symbol_path) = env::var("DBGSHELL_SYMBOL_PATH") {
            self.debugger.symbol_path = if symbol_path.trim().is_empty() {
                None
            } else {
                Some(symbol_path)
            };
        }

        if let Some(value) = parse_env("DBGSHELL_COMMAND_TIMEOUT_SECS") {
            self.session.command_timeout_secs = value;
        }

        if let Some(value) = parse_env("DBGSHELL_READY_TIMEOUT_SECS") {
            self.session.ready_timeout_secs = value;
        }

        if let Some(value) = parse_env("DBGSHELL_AUTO_RESTART") {
            self.session.auto_restart = value;
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        if !path.as_ref().exists() {
            let mut config = Self::default();
            config.apply_env_overrides();
            return config;
        }

        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {:#}, using defaults", err);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.debugger.path.trim().is_empty() {
            anyhow::bail!("debugger.path must not be empty");
        }

        if self.debugger.exit_command.trim().is_empty() {
            anyhow::bail!("debugger.exit_command must not be empty");
        }

        if !self.debugger.echo_template.contains("{marker}") {
            anyhow::bail!("debugger.echo_template must contain {{marker}}");
        }

        PromptMatcher::new(&self.debugger.prompt_patterns)
            .context("debugger.prompt_patterns is invalid")?;

        if self.session.command_timeout_secs == 0 {
            anyhow::bail!("session.command_timeout_secs must be greater than 0");
        }

        if self.session.ready_timeout_secs == 0 {
            anyhow::bail!("session.ready_timeout_secs must be greater than 0");
        }

        if self.session.poll_interval_ms == 0 {
            anyhow::bail!("session.poll_interval_ms must be greater than 0");
        }

        if self.session.partial_flush_ms == 0 {
            anyhow::bail!("session.partial_flush_ms must be greater than 0");
        }

        if self.session.max_command_length == 0 {
            anyhow::bail!("session.max_command_length must be greater than 0");
        }

        Ok(())
    }

    /// Set a dotted key such as `session.command_timeout_secs`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut document = toml::Value::try_from(&*self).context("Failed to serialize configuration")?;

        let mut segments = key.split('.').peekable();
        let mut table = document
            .as_table_mut()
            .context("Configuration is not a table")?;
        let leaf = loop {
            let Some(segment) = segments.next() else {
                anyhow::bail!("Empty configuration key");
            };
            if segments.peek().is_none() {
                break segment;
            }
            table = table
                .get_mut(segment)
                .and_then(toml::Value::as_table_mut)
                .with_context(|| format!("Unknown configuration section in '{}'", key))?;
        };

        let current = table
            .get(leaf)
            .with_context(|| format!("Unknown configuration key '{}'", key))?;
        let parsed = parse_like(current, value)
            .with_context(|| format!("Invalid value '{}' for '{}'", value, key))?;
        table.insert(leaf.to_string(), parsed);

        let updated: Config = document
            .try_into()
            .with_context(|| format!("Invalid value '{}' for '{}'", value, key))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!(
            "{}",
            toml::to_string_pretty(self).context("Failed to serialize configuration")?
        );
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  dbgshell config show              - Show current configuration");
        println!("  dbgshell config set <key> <value> - Set configuration value");
        println!("  dbgshell config reset             - Reset to default configuration");
        Ok(())
    }

    /// Handle configuration command against the file at `path`
    pub fn handle_command(action: &Option<crate::cli::ConfigAction>, path: &Path) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load_or_default(path);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Set { key, value }) => {
                let mut config = if path.exists() {
                    Config::load_from_file(path)?
                } else {
                    Config::default()
                };
                config.set_value(key, value)?;
                config.save_to_file(path)?;
                println!("Set {} = {} in {}", key, value, path.display());
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(path)?;
                println!("Configuration reset: {}", path.display());
                default_config.display()?;
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}

/// Parse `raw` into the same TOML type as `current`
fn parse_like(current: &toml::Value, raw: &str) -> Result<toml::Value> {
    let value = match current {
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Integer(_) => toml::Value::Integer(raw.trim().parse()?),
        toml::Value::Float(_) => toml::Value::Float(raw.trim().parse()?),
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.trim().parse()?),
        toml::Value::Array(_) => toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| toml::Value::String(item.to_string()))
                .collect(),
        ),
        other => anyhow::bail!("cannot set a value of type {}", other.type_str()),
    };
    Ok(value)
}
