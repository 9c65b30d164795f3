//! User Interface module
//!
//! Colored line-oriented terminal output for the shell and one-shot commands.

/// Simple CLI output functions
pub mod cli;

use crate::debugger::CommandResult;

/// JSON rendering of a command result for scripted use
pub fn result_to_json(result: &CommandResult) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}
