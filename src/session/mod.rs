//! Interactive shell module
//!
//! This module provides the components of the interactive debugger shell:
//! input routing, event processing and the shell loop itself.

pub mod action_channel;
pub mod command_router;
pub mod shell;

pub use action_channel::{ActionChannel, ShellEvent};
pub use command_router::{COMMAND_ALIASES, CommandRouter, ShellCommand, resolve_alias};
pub use shell::{ShellSession, ShellState};
